//! Face-swap media worker.
//!
//! This crate provides:
//! - The polling task executor
//! - The per-task pipeline (download, normalise, swap, thumbnail, upload)
//! - Overall progress folding and rate-limited progress reporting
//! - Graceful shutdown between tasks

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod workspace;

pub use config::WorkerConfig;
pub use error::{WorkerError, WorkerResult};
pub use executor::{PollOutcome, TaskExecutor};
pub use logging::TaskLogger;
pub use pipeline::{plan_stages, TaskPipeline};
pub use progress::{overall_progress, ProgressReporter, StepProgressAggregator};
pub use workspace::TaskWorkspace;
