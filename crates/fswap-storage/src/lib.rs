//! Signed-URL transfers for task inputs and artifacts.

pub mod download;
pub mod error;
pub mod upload;

pub use download::{download_file, download_file_with_idle_timeout, DEFAULT_IDLE_TIMEOUT};
pub use error::{StorageError, StorageResult};
pub use upload::{SuccessPolicy, UploadAttempt, UploadConfig, UploadSupervisor};
