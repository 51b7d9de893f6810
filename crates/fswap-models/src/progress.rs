//! Progress values extracted from tool output.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Progress parsed from one line of inference-engine output.
///
/// Transient: produced per matched line and consumed immediately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Module label, e.g. `FACE_SWAPPER`
    pub module: String,
    /// Percent as printed, e.g. `42%`
    pub progress: String,
    /// Numeric percent within the current process (0-100)
    pub percent: u8,
    /// Frame fraction as printed, e.g. `10/570`
    pub frame_count: String,
    /// Processing rate in frames per second
    pub fps: f64,
}

/// Overall task progress reported upstream.
///
/// The progress channel never carries 100; completion is only signalled by
/// the final state update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct OverallProgress(pub u8);

impl OverallProgress {
    /// Highest value the progress channel may carry.
    pub const MAX_REPORTED: u8 = 99;

    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for OverallProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}
