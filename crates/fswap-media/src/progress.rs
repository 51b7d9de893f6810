//! FaceFusion progress-bar parsing.

use std::sync::LazyLock;

use fswap_models::ProgressEvent;
use regex::Regex;

/// Matches e.g.
/// `[FACEFUSION.FACE_SWAPPER] Processing:  42%|████      | 10/570 [00:01<00:30, 23.32frame/s]`.
static PROGRESS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[([^\]]+)\] Processing:\s+(\d+%)\|.*\|\s+(\d+/\d+).*?([\d.]+)frame/s")
        .expect("valid progress regex")
});

/// Parse one output line into a progress event.
///
/// Lines that do not match, or whose numbers do not parse, yield `None`.
pub fn extract_progress(line: &str) -> Option<ProgressEvent> {
    let caps = PROGRESS_RE.captures(line)?;

    let progress = caps.get(2)?.as_str().to_string();
    let percent = progress
        .trim_end_matches('%')
        .parse::<u32>()
        .ok()?
        .min(100) as u8;
    let fps = caps.get(4)?.as_str().parse::<f64>().ok()?;

    Some(ProgressEvent {
        module: caps.get(1)?.as_str().to_string(),
        progress,
        percent,
        frame_count: caps.get(3)?.as_str().to_string(),
        fps,
    })
}
