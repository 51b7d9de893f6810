//! Overall task progress: folding per-step percentages and forwarding them
//! upstream.
//!
//! The pipeline advances the step index as it moves from one face-swap pass to
//! the next; a forwarder task turns supervisor output lines into progress
//! events, folds them into an overall percentage and hands them to the
//! rate-limited reporter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fswap_media::{extract_progress, OutputLine};
use fswap_models::{OverallProgress, ProgressEvent, ProgressUpdate, TaskId};
use fswap_queue::TaskApi;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics;

/// Fold a per-step percentage into the overall task percentage.
///
/// Never exceeds [`OverallProgress::MAX_REPORTED`] unless `total_steps` is 0,
/// in which case `percent` is passed through as is.
pub fn overall_progress(step_index: usize, total_steps: usize, percent: u8) -> OverallProgress {
    if total_steps == 0 {
        return OverallProgress(percent);
    }
    let base = step_index.min(total_steps) * 100 / total_steps;
    let contribution = usize::from(percent.min(100)) / total_steps;
    let overall = (base + contribution).min(usize::from(OverallProgress::MAX_REPORTED));
    OverallProgress(overall as u8)
}

/// Shared step counter for one task.
#[derive(Debug, Default)]
pub struct StepProgressAggregator {
    current_step: AtomicUsize,
    total_steps: AtomicUsize,
}

impl StepProgressAggregator {
    pub fn new(total_steps: usize) -> Self {
        Self {
            current_step: AtomicUsize::new(0),
            total_steps: AtomicUsize::new(total_steps),
        }
    }

    /// Move to step `index` (0-based).
    pub fn set_step(&self, index: usize) {
        self.current_step.store(index, Ordering::SeqCst);
    }

    pub fn step(&self) -> usize {
        self.current_step.load(Ordering::SeqCst)
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps.load(Ordering::SeqCst)
    }

    pub fn fold(&self, event: &ProgressEvent) -> OverallProgress {
        overall_progress(self.step(), self.total_steps(), event.percent)
    }
}

/// Best-effort, rate-limited progress sender for one task.
pub struct ProgressReporter {
    api: Arc<dyn TaskApi>,
    task_id: TaskId,
    min_interval: Duration,
    last_sent: Mutex<Option<Instant>>,
}

impl ProgressReporter {
    pub fn new(api: Arc<dyn TaskApi>, task_id: TaskId, min_interval: Duration) -> Self {
        Self {
            api,
            task_id,
            min_interval,
            last_sent: Mutex::new(None),
        }
    }

    fn last_sent(&self) -> Option<Instant> {
        *self.last_sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send `event` unless the previous successful send is too recent.
    ///
    /// Returns whether the update was delivered. Throttled updates are
    /// dropped, not queued.
    pub async fn report(&self, event: &ProgressEvent, overall: OverallProgress) -> bool {
        if let Some(last) = self.last_sent() {
            if last.elapsed() < self.min_interval {
                metrics::record_progress_throttled();
                return false;
            }
        }

        let update = ProgressUpdate::new(event, overall);
        match self.api.report_progress(&self.task_id, &update).await {
            Ok(()) => {
                *self.last_sent.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                    Some(Instant::now());
                metrics::record_progress_sent();
                debug!(
                    task_id = %self.task_id,
                    module = %event.module,
                    "Progress {} ({} frames, {:.2} fps)",
                    overall,
                    event.frame_count,
                    event.fps
                );
                true
            }
            Err(e) => {
                metrics::record_progress_failed();
                warn!(task_id = %self.task_id, "Failed to report progress: {}", e);
                false
            }
        }
    }
}

/// Consume supervisor output lines until the sender side closes.
pub fn spawn_forwarder(
    mut lines: mpsc::Receiver<OutputLine>,
    aggregator: Arc<StepProgressAggregator>,
    reporter: Arc<ProgressReporter>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(line) = lines.recv().await {
            if let Some(event) = extract_progress(&line.text) {
                let overall = aggregator.fold(&event);
                reporter.report(&event, overall).await;
            }
        }
    })
}
