//! Pipeline stage definitions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Kind of external-process step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum StageKind {
    /// Normalize the downloaded media (resolution, watermark, trim).
    Convert,
    /// Zero-based face-swap pass.
    FaceSwap { index: usize },
    /// Face enhancement over the last swap output.
    Enhance,
    /// Thumbnail of the final artifact.
    Thumbnail,
    /// Re-encode the final video as an animated GIF.
    GifEncode,
}

impl StageKind {
    /// Stable label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            StageKind::Convert => "convert",
            StageKind::FaceSwap { .. } => "face_swap",
            StageKind::Enhance => "enhance",
            StageKind::Thumbnail => "thumbnail",
            StageKind::GifEncode => "gif_encode",
        }
    }

    /// Whether this stage counts toward the overall-progress step total.
    pub fn is_progress_step(&self) -> bool {
        matches!(self, StageKind::FaceSwap { .. } | StageKind::Enhance)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::FaceSwap { index } => write!(f, "face_swap[{}]", index),
            other => f.write_str(other.label()),
        }
    }
}

/// How the inference engine picks faces in the target media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FaceSelectorMode {
    /// Only faces resembling the reference face.
    Reference,
    /// Every detected face.
    #[default]
    Many,
}

/// One ordered step of the pipeline.
///
/// Stages are planned from the task parameters before execution starts and
/// are not modified afterwards. The output of one stage is the input of the
/// next one in the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStage {
    pub kind: StageKind,
    pub input: PathBuf,
    pub output: PathBuf,
    pub selector: FaceSelectorMode,
    /// A failing exit status aborts the task.
    pub fatal: bool,
}

impl PipelineStage {
    pub fn new(kind: StageKind, input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            input: input.into(),
            output: output.into(),
            selector: FaceSelectorMode::Many,
            fatal: true,
        }
    }

    pub fn with_selector(mut self, selector: FaceSelectorMode) -> Self {
        self.selector = selector;
        self
    }

    pub fn non_fatal(mut self) -> Self {
        self.fatal = false;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_builder() {
        let stage = PipelineStage::new(StageKind::FaceSwap { index: 1 }, "a.mp4", "b.mp4")
            .with_selector(FaceSelectorMode::Reference);
        assert!(stage.fatal);
        assert_eq!(stage.selector, FaceSelectorMode::Reference);
        assert_eq!(stage.kind.to_string(), "face_swap[1]");

        let thumb = PipelineStage::new(StageKind::Thumbnail, "b.mp4", "t.jpg").non_fatal();
        assert!(!thumb.fatal);
        assert_eq!(thumb.kind.label(), "thumbnail");
    }

    #[test]
    fn test_progress_steps() {
        assert!(StageKind::FaceSwap { index: 0 }.is_progress_step());
        assert!(StageKind::Enhance.is_progress_step());
        assert!(!StageKind::Convert.is_progress_step());
        assert!(!StageKind::GifEncode.is_progress_step());
    }
}
