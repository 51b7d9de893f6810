//! Retried uploads to pre-signed URLs with per-attempt stall detection.
//!
//! Every attempt streams the file in chunks. Each chunk pulled by the HTTP
//! client counts as transfer activity; when no chunk moves for longer than the
//! stall threshold the attempt is abandoned instead of waiting for a generic
//! network timeout. Failed attempts are retried after a linear backoff.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::stream;
use metrics::{counter, histogram};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Client, StatusCode};
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::{StorageError, StorageResult};

/// Which HTTP statuses count as a successful upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SuccessPolicy {
    /// Any 2xx status.
    #[default]
    AnySuccess,
    /// Only 200 OK and 204 No Content.
    OkOrNoContent,
}

impl SuccessPolicy {
    pub fn accepts(&self, status: StatusCode) -> bool {
        match self {
            SuccessPolicy::AnySuccess => status.is_success(),
            SuccessPolicy::OkOrNoContent => {
                status == StatusCode::OK || status == StatusCode::NO_CONTENT
            }
        }
    }

    /// Parse `2xx` or `200,204`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace(' ', "").as_str() {
            "2xx" | "any" => Some(SuccessPolicy::AnySuccess),
            "200,204" | "204,200" | "ok-or-no-content" => Some(SuccessPolicy::OkOrNoContent),
            _ => None,
        }
    }
}

/// Configuration for the upload supervisor.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Total attempts per upload
    pub max_retries: u32,
    /// Transfer silence after which an attempt is abandoned
    pub stall_timeout: Duration,
    /// Backoff before attempt `n + 1` is `n * backoff_unit`
    pub backoff_unit: Duration,
    /// Bytes read from disk per body chunk
    pub chunk_size: usize,
    /// Accepted response statuses
    pub success_policy: SuccessPolicy,
    /// Hard cap on one attempt
    pub request_timeout: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            stall_timeout: Duration::from_secs(600),
            backoff_unit: Duration::from_secs(2),
            chunk_size: 1024 * 1024,
            success_policy: SuccessPolicy::AnySuccess,
            request_timeout: Duration::from_secs(60 * 60),
        }
    }
}

impl UploadConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_retries: std::env::var("UPLOAD_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_retries),
            stall_timeout: std::env::var("UPLOAD_STALL_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.stall_timeout),
            backoff_unit: std::env::var("UPLOAD_BACKOFF_UNIT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.backoff_unit),
            chunk_size: std::env::var("UPLOAD_CHUNK_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.chunk_size),
            success_policy: std::env::var("UPLOAD_ACCEPT")
                .ok()
                .and_then(|s| SuccessPolicy::parse(&s))
                .unwrap_or(defaults.success_policy),
            request_timeout: defaults.request_timeout,
        }
    }

    /// Delay before the attempt following `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        self.backoff_unit * attempt
    }

    fn watchdog_interval(&self) -> Duration {
        (self.stall_timeout / 4).clamp(Duration::from_millis(10), Duration::from_secs(5))
    }
}

/// Bookkeeping for one upload attempt.
#[derive(Debug, Clone)]
pub struct UploadAttempt {
    pub path: PathBuf,
    pub url: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub content_length: u64,
    last_activity: Arc<Mutex<Instant>>,
}

impl UploadAttempt {
    fn new(path: &Path, url: &str, attempt: u32, content_length: u64) -> Self {
        Self {
            path: path.to_path_buf(),
            url: url.to_string(),
            attempt,
            content_length,
            last_activity: Arc::new(Mutex::new(Instant::now())),
        }
    }

    fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Instant::now();
    }

    /// Time since the last chunk moved.
    pub fn idle(&self) -> Duration {
        self.last_activity
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .elapsed()
    }
}

/// Uploads artifacts to signed URLs with bounded retries.
#[derive(Debug, Clone)]
pub struct UploadSupervisor {
    client: Client,
    config: UploadConfig,
}

impl UploadSupervisor {
    pub fn new(client: Client, config: UploadConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Upload `path` to `signed_url`.
    ///
    /// Returns `false` after the last failed attempt; never returns an error.
    pub async fn upload(&self, path: impl AsRef<Path>, signed_url: &str) -> bool {
        let path = path.as_ref();
        let started = Instant::now();
        let max = self.config.max_retries.max(1);

        for attempt in 1..=max {
            counter!("fswap_upload_attempts_total").increment(1);

            match self.try_upload(path, signed_url, attempt).await {
                Ok(()) => {
                    info!(
                        attempt,
                        "Uploaded {} in {:.1}s",
                        path.display(),
                        started.elapsed().as_secs_f64()
                    );
                    histogram!("fswap_upload_duration_seconds")
                        .record(started.elapsed().as_secs_f64());
                    return true;
                }
                Err(e) if !e.is_retryable() => {
                    error!(attempt, "Upload of {} failed: {}", path.display(), e);
                    break;
                }
                Err(e) => {
                    warn!(attempt, max, "Upload of {} failed: {}", path.display(), e);
                    if attempt < max {
                        let delay = self.config.backoff_after(attempt);
                        debug!("Retrying upload in {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        counter!("fswap_upload_failures_total").increment(1);
        error!("Giving up on upload of {}", path.display());
        false
    }

    async fn try_upload(&self, path: &Path, url: &str, attempt: u32) -> StorageResult<()> {
        let file = tokio::fs::File::open(path).await?;
        let content_length = file.metadata().await?.len();
        let state = UploadAttempt::new(path, url, attempt, content_length);
        debug!(
            attempt,
            bytes = content_length,
            "Uploading {}",
            state.path.display()
        );

        let body = Body::wrap_stream(chunk_stream(file, self.config.chunk_size, state.clone()));
        let request = self
            .client
            .put(url)
            .header(CONTENT_LENGTH, content_length)
            .header(CONTENT_TYPE, "application/octet-stream")
            .timeout(self.config.request_timeout)
            .body(body)
            .send();

        let watchdog = async {
            let mut ticker = tokio::time::interval(self.config.watchdog_interval());
            loop {
                ticker.tick().await;
                let idle = state.idle();
                if idle > self.config.stall_timeout {
                    return idle;
                }
            }
        };

        tokio::select! {
            response = request => {
                let status = response?.status();
                if self.config.success_policy.accepts(status) {
                    Ok(())
                } else {
                    Err(StorageError::UnexpectedStatus(status.as_u16()))
                }
            }
            idle = watchdog => Err(StorageError::Stalled(idle)),
        }
    }
}

/// Body stream over `file`, marking activity on every chunk handed out.
fn chunk_stream(
    file: tokio::fs::File,
    chunk_size: usize,
    attempt: UploadAttempt,
) -> impl futures::Stream<Item = std::io::Result<Vec<u8>>> + Send + 'static {
    stream::try_unfold((file, attempt), move |(mut file, attempt)| async move {
        let mut buf = vec![0u8; chunk_size];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok::<_, std::io::Error>(None);
        }
        buf.truncate(n);
        attempt.touch();
        Ok(Some((buf, (file, attempt))))
    })
}
