//! Task executor.
//!
//! Polls the task API for one task at a time and runs it through the
//! pipeline. The work directory is cleaned before every poll, so a crash in
//! the middle of a task never leaks files into the next one.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use fswap_models::{FetchTaskRequest, TaskPhase};
use fswap_queue::TaskApi;
use reqwest::Client;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::TaskPipeline;
use crate::retry::FailureTracker;

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// A task was run to the given terminal phase.
    Processed(TaskPhase),
    /// The queue had nothing for this worker.
    Idle,
    /// The fetch call itself failed.
    FetchFailed,
}

impl PollOutcome {
    /// Whether the loop should back off before polling again.
    pub fn needs_backoff(&self) -> bool {
        !matches!(self, PollOutcome::Processed(_))
    }
}

/// Single-slot polling executor.
pub struct TaskExecutor {
    config: Arc<WorkerConfig>,
    api: Arc<dyn TaskApi>,
    pipeline: TaskPipeline,
    failures: Mutex<FailureTracker>,
    shutdown: watch::Sender<bool>,
    consumer_name: String,
}

impl TaskExecutor {
    /// Create an executor; the work directory is created if missing.
    pub fn new(mut config: WorkerConfig, api: Arc<dyn TaskApi>) -> WorkerResult<Self> {
        std::fs::create_dir_all(&config.work_dir)?;
        // Tools run with the work dir as cwd, so paths handed to them must be absolute.
        config.work_dir = std::fs::canonicalize(&config.work_dir)?;

        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| WorkerError::config_error(format!("Failed to build HTTP client: {}", e)))?;

        let config = Arc::new(config);
        let pipeline = TaskPipeline::new(Arc::clone(&config), Arc::clone(&api), http);
        let failures = Mutex::new(FailureTracker::new(config.max_logged_failures));
        let (shutdown, _) = watch::channel(false);

        Ok(Self {
            config,
            api,
            pipeline,
            failures,
            shutdown,
            consumer_name: format!("worker-{}", Uuid::new_v4()),
        })
    }

    pub fn consumer_name(&self) -> &str {
        &self.consumer_name
    }

    /// Poll until shutdown is signalled (or after one task in one-shot mode).
    ///
    /// Shutdown is only observed between tasks; a running task is finished
    /// first.
    pub async fn run(&self) -> WorkerResult<()> {
        info!(
            "Starting task executor '{}' in {} (mode {}, term {})",
            self.consumer_name,
            self.config.work_dir.display(),
            self.config.execution_mode,
            self.config.term
        );

        let mut shutdown_rx = self.shutdown.subscribe();
        loop {
            if *shutdown_rx.borrow() {
                info!("Shutdown signal received, stopping executor");
                break;
            }

            let outcome = self.run_once().await;
            if self.config.one_shot {
                if let PollOutcome::Processed(phase) = outcome {
                    info!("One-shot mode: task ended {}, exiting", phase);
                    break;
                }
            }

            if outcome.needs_backoff() {
                tokio::select! {
                    _ = shutdown_rx.changed() => {}
                    _ = tokio::time::sleep(self.config.poll_backoff) => {}
                }
            }
        }

        if let Err(e) = self.pipeline.workspace().cleanup().await {
            warn!("Final cleanup failed: {}", e);
        }
        info!("Task executor stopped");
        Ok(())
    }

    /// One poll cycle: clean up, fetch, and run whatever was fetched.
    pub async fn run_once(&self) -> PollOutcome {
        if let Err(e) = self.pipeline.workspace().cleanup().await {
            warn!("Failed to clean work directory: {}", e);
        }

        let request = FetchTaskRequest {
            sc: self.config.sc.clone(),
            mode: self.config.execution_mode.clone(),
            term: self.config.term.clone(),
        };

        let task = match self.api.fetch_task(&request).await {
            Ok(task) => {
                self.failure_tracker().record_success();
                task
            }
            Err(e) => {
                metrics::record_fetch_failure();
                if self.failure_tracker().record_failure() {
                    error!("Failed to fetch task: {}", e);
                }
                return PollOutcome::FetchFailed;
            }
        };

        let Some(task) = task else {
            debug!("No task available");
            return PollOutcome::Idle;
        };

        metrics::record_task_fetched();
        info!("Executing task {} ({})", task.id, task.name);
        let phase = self.pipeline.run(&task).await;
        PollOutcome::Processed(phase)
    }

    fn failure_tracker(&self) -> std::sync::MutexGuard<'_, FailureTracker> {
        self.failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Signal shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_only_without_work() {
        assert!(PollOutcome::Idle.needs_backoff());
        assert!(PollOutcome::FetchFailed.needs_backoff());
        assert!(!PollOutcome::Processed(TaskPhase::Done).needs_backoff());
        assert!(!PollOutcome::Processed(TaskPhase::Failed).needs_backoff());
    }
}
