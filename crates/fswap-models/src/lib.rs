//! Shared data models for the face-swap worker.
//!
//! This crate provides Serde-serializable types for:
//! - Tasks handed out by the remote queue and their parameters
//! - Pipeline stages and the task lifecycle
//! - Progress events and the aggregated overall percentage
//! - Request/response envelopes of the task API

pub mod api;
pub mod error;
pub mod progress;
pub mod serde_utils;
pub mod stage;
pub mod task;

pub use api::{
    ApiEnvelope, FetchTaskRequest, MediaResult, ProgressUpdate, SignedUpload, TaskOutcome,
    TaskStateUpdate,
};
pub use error::{ModelError, ModelResult};
pub use progress::{OverallProgress, ProgressEvent};
pub use stage::{FaceSelectorMode, PipelineStage, StageKind};
pub use task::{MediaKind, SwapPair, Task, TaskId, TaskParams, TaskPhase};
