//! Task API HTTP client.

use std::time::Duration;

use async_trait::async_trait;
use fswap_models::{
    ApiEnvelope, FetchTaskRequest, ProgressUpdate, SignedUpload, Task, TaskId, TaskStateUpdate,
};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::error::{QueueError, QueueResult};

/// Configuration for the task API client.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Base URL of the task API
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Task type segment of the fetch path
    pub task_type: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            timeout: Duration::from_secs(10),
            task_type: "faceSwapApi".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("TASK_API_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            timeout: Duration::from_secs(
                std::env::var("TASK_API_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            task_type: std::env::var("TASK_TYPE").unwrap_or_else(|_| "faceSwapApi".to_string()),
        }
    }
}

/// Operations the worker needs from the remote task queue.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// Lease the next task, or `None` when the queue has nothing for us.
    async fn fetch_task(&self, request: &FetchTaskRequest) -> QueueResult<Option<Task>>;

    /// Persist a task state (terminal success or failure).
    async fn update_state(&self, update: &TaskStateUpdate) -> QueueResult<()>;

    /// Send a lightweight progress update.
    async fn report_progress(&self, task_id: &TaskId, update: &ProgressUpdate) -> QueueResult<()>;

    /// Obtain a pre-signed upload destination for `filename`.
    async fn sign_upload(&self, filename: &str) -> QueueResult<SignedUpload>;
}

/// [`TaskApi`] over HTTP + JSON.
#[derive(Debug, Clone)]
pub struct HttpTaskApi {
    http: Client,
    base_url: Url,
    task_type: String,
}

impl HttpTaskApi {
    /// Create a new client.
    pub fn new(config: ApiConfig) -> QueueResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(QueueError::Network)?;

        // A trailing slash makes `join` append instead of replacing the last segment.
        let mut base = config.base_url.trim().to_string();
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base)
            .map_err(|e| QueueError::config(format!("TASK_API_BASE_URL {:?}: {}", base, e)))?;

        Ok(Self {
            http,
            base_url,
            task_type: config.task_type,
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(ApiConfig::from_env())
    }

    fn endpoint(&self, path: &str) -> QueueResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| QueueError::config(format!("bad endpoint {}: {}", path, e)))
    }

    /// POST `body` as JSON and parse the `{code, data, info}` envelope.
    async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> QueueResult<ApiEnvelope<Value>> {
        let url = self.endpoint(path)?;
        debug!("POST {}", url);

        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(QueueError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| QueueError::invalid_response(format!("{}: {}", path, e)))
    }

    /// Like [`post`](Self::post) but `code != 0` is an error.
    async fn post_ok<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> QueueResult<Option<Value>> {
        let envelope = self.post(path, body).await?;
        if !envelope.is_ok() {
            return Err(QueueError::rejected(format!("{}: {}", path, envelope.info_or_code())));
        }
        Ok(envelope.data)
    }
}

fn parse_data<T: DeserializeOwned>(path: &str, data: Value) -> QueueResult<T> {
    serde_json::from_value(data).map_err(|e| QueueError::invalid_response(format!("{}: {}", path, e)))
}

/// Extension without the dot, used as the signing path segment.
fn upload_extension(filename: &str) -> &str {
    match filename.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() && !ext.contains('/') => ext,
        _ => "bin",
    }
}

#[async_trait]
impl TaskApi for HttpTaskApi {
    async fn fetch_task(&self, request: &FetchTaskRequest) -> QueueResult<Option<Task>> {
        let path = format!("v1/worker_task_get/{}/{}", self.task_type, request.term);
        let envelope = self.post(&path, request).await?;

        if !envelope.is_ok() {
            debug!("No task: {}", envelope.info_or_code());
            return Ok(None);
        }

        match envelope.data {
            None | Some(Value::Null) => Ok(None),
            Some(data) => parse_data(&path, data).map(Some),
        }
    }

    async fn update_state(&self, update: &TaskStateUpdate) -> QueueResult<()> {
        self.post_ok("v1/worker_task_set", update).await?;
        Ok(())
    }

    async fn report_progress(&self, task_id: &TaskId, update: &ProgressUpdate) -> QueueResult<()> {
        let path = format!("v1/worker_task_process/{}", task_id);
        self.post_ok(&path, update).await?;
        Ok(())
    }

    async fn sign_upload(&self, filename: &str) -> QueueResult<SignedUpload> {
        let path = format!("mediaPro/workerSignS3/{}", upload_extension(filename));
        let data = self
            .post_ok(&path, &json!({ "filename": filename }))
            .await?
            .ok_or_else(|| QueueError::invalid_response(format!("{}: missing data", path)))?;
        parse_data(&path, data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.task_type, "faceSwapApi");
    }

    #[test]
    fn test_endpoint_joins_under_base_path() {
        let api = HttpTaskApi::new(ApiConfig {
            base_url: "https://api.example.com/prefix".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            api.endpoint("v1/worker_task_set").unwrap().as_str(),
            "https://api.example.com/prefix/v1/worker_task_set"
        );
    }

    #[test]
    fn test_bad_base_url() {
        let result = HttpTaskApi::new(ApiConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        });
        assert!(matches!(result, Err(QueueError::Config(_))));
    }

    #[test]
    fn test_upload_extension() {
        assert_eq!(upload_extension("out_1700000000.mp4"), "mp4");
        assert_eq!(upload_extension("thumb.jpg"), "jpg");
        assert_eq!(upload_extension("noext"), "bin");
    }
}
