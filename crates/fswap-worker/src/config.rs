//! Worker configuration.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use fswap_media::SupervisorConfig;
use fswap_storage::UploadConfig;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Directory holding the per-task working files; external tools run here
    pub work_dir: PathBuf,
    /// Delay before the next poll after an empty or failed fetch
    pub poll_backoff: Duration,
    /// Minimum gap between two progress updates
    pub progress_interval: Duration,
    /// Silence tolerated from a media server before a download is abandoned
    pub download_idle_timeout: Duration,
    /// Inference execution provider (`cpu` or `cuda`)
    pub execution_mode: String,
    /// Capability term sent with every fetch
    pub term: String,
    /// Worker secret sent with every fetch
    pub sc: String,
    /// Exit after one task
    pub one_shot: bool,
    /// Python interpreter running FaceFusion
    pub python_program: String,
    /// FaceFusion entry script, relative to the work dir
    pub facefusion_script: PathBuf,
    /// FaceFusion execution thread count
    pub facefusion_threads: u32,
    /// FaceFusion execution queue count
    pub facefusion_queue: u32,
    /// FFmpeg binary
    pub ffmpeg_program: String,
    /// ImageMagick `convert` binary
    pub convert_program: String,
    /// Face-swapper model used when a task names none
    pub default_model: String,
    /// Prometheus listener address
    pub metrics_addr: Option<SocketAddr>,
    /// Consecutive fetch failures logged before suppression
    pub max_logged_failures: u32,
    /// Process supervision settings
    pub supervisor: SupervisorConfig,
    /// Artifact upload settings
    pub upload: UploadConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            poll_backoff: Duration::from_secs(3),
            progress_interval: Duration::from_secs(5),
            download_idle_timeout: fswap_storage::DEFAULT_IDLE_TIMEOUT,
            execution_mode: "cuda".to_string(),
            term: "cuda".to_string(),
            sc: String::new(),
            one_shot: false,
            python_program: "python".to_string(),
            facefusion_script: PathBuf::from("run.py"),
            facefusion_threads: 32,
            facefusion_queue: 2,
            ffmpeg_program: "ffmpeg".to_string(),
            convert_program: "convert".to_string(),
            default_model: "inswapper_128".to_string(),
            metrics_addr: None,
            max_logged_failures: 5,
            supervisor: SupervisorConfig::default(),
            upload: UploadConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            poll_backoff: Duration::from_secs(
                std::env::var("WORKER_POLL_BACKOFF_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(3),
            ),
            progress_interval: Duration::from_secs(
                std::env::var("WORKER_PROGRESS_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(5),
            ),
            download_idle_timeout: std::env::var("DOWNLOAD_IDLE_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.download_idle_timeout),
            execution_mode: match std::env::var("WORKER_EXECUTION_MODE").as_deref() {
                Ok("cpu") => "cpu".to_string(),
                _ => "cuda".to_string(),
            },
            term: std::env::var("WORKER_TERM").unwrap_or(defaults.term),
            sc: std::env::var("WORKER_SC").unwrap_or_default(),
            one_shot: std::env::var("WORKER_ONE_SHOT")
                .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            python_program: std::env::var("FACEFUSION_PYTHON").unwrap_or(defaults.python_program),
            facefusion_script: std::env::var("FACEFUSION_SCRIPT")
                .map(PathBuf::from)
                .unwrap_or(defaults.facefusion_script),
            facefusion_threads: std::env::var("FACEFUSION_THREADS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(32),
            facefusion_queue: std::env::var("FACEFUSION_QUEUE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            ffmpeg_program: std::env::var("FFMPEG_PROGRAM").unwrap_or(defaults.ffmpeg_program),
            convert_program: std::env::var("CONVERT_PROGRAM").unwrap_or(defaults.convert_program),
            default_model: std::env::var("FACE_SWAPPER_MODEL").unwrap_or(defaults.default_model),
            metrics_addr: std::env::var("METRICS_ADDR")
                .ok()
                .and_then(|s| s.parse().ok()),
            max_logged_failures: std::env::var("WORKER_MAX_LOGGED_FAILURES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(5),
            supervisor: SupervisorConfig::from_env(),
            upload: UploadConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_backoff, Duration::from_secs(3));
        assert_eq!(config.progress_interval, Duration::from_secs(5));
        assert_eq!(config.download_idle_timeout, Duration::from_secs(60));
        assert_eq!(config.supervisor.stall_timeout, Duration::from_secs(300));
        assert_eq!(config.upload.max_retries, 3);
        assert!(!config.one_shot);
    }
}
