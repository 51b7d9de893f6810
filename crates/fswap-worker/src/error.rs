//! Worker error types.

use std::path::PathBuf;

use fswap_media::ExitOutcome;
use fswap_models::StageKind;
use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("{0}")]
    MissingInput(String),

    #[error("{stage} failed: {outcome}")]
    StageFailed { stage: StageKind, outcome: ExitOutcome },

    #[error("Cannot find file {0}")]
    ArtifactMissing(PathBuf),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    Storage(#[from] fswap_storage::StorageError),

    #[error("Media error: {0}")]
    Media(#[from] fswap_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] fswap_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<fswap_models::ModelError> for WorkerError {
    fn from(e: fswap_models::ModelError) -> Self {
        match e {
            fswap_models::ModelError::MissingInput(msg) => Self::MissingInput(msg),
            other => Self::MissingInput(other.to_string()),
        }
    }
}

impl WorkerError {
    pub fn stage_failed(stage: StageKind, outcome: ExitOutcome) -> Self {
        Self::StageFailed { stage, outcome }
    }

    pub fn download_failed(msg: impl Into<String>) -> Self {
        Self::DownloadFailed(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::UploadFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
