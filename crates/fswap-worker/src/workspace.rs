//! Well-known working-file names of a task.
//!
//! External tools run inside the work directory and the inference engine
//! looks for some of these names on its own (`reface.png`, `nsfw`), so the
//! layout is fixed. Only one task runs per work directory; everything here is
//! deleted before each poll cycle.

use std::path::{Path, PathBuf};

use fswap_media::fs_utils::{remove_files, remove_with_prefix};
use fswap_media::MediaResult;
use fswap_models::MediaKind;
use tracing::debug;

const REFERENCE_FACE: &str = "reface.png";
const BORDERED_FACE: &str = "face.png";
const THUMBNAIL: &str = "thumb_media.jpg";
const PALETTE: &str = "palette.png";
const NSFW_MARKER: &str = "nsfw";

/// Fixed file names for every stage of a task.
#[derive(Debug, Clone)]
pub struct TaskWorkspace {
    dir: PathBuf,
}

impl TaskWorkspace {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Downloaded media, keeping the source extension (e.g. `.mov`).
    pub fn input(&self, extension: &str) -> PathBuf {
        self.dir.join(format!("input{}", extension))
    }

    /// Animated WebP inputs are converted to this GIF.
    pub fn input_gif(&self) -> PathBuf {
        self.dir.join("input.gif")
    }

    /// Normalised media fed to the first face-swap pass.
    pub fn media(&self, kind: MediaKind) -> PathBuf {
        self.dir.join(format!("media{}", kind.working_extension()))
    }

    pub fn reference_face(&self) -> PathBuf {
        self.dir.join(REFERENCE_FACE)
    }

    /// Raw replacement face of pass `index` (1-based).
    pub fn to_face(&self, index: usize) -> PathBuf {
        self.dir.join(format!("to_face_{}.png", index))
    }

    /// Replacement face padded with a border.
    pub fn bordered_face(&self) -> PathBuf {
        self.dir.join(BORDERED_FACE)
    }

    /// Intermediate output of pass `index` (1-based).
    pub fn swap_output(&self, index: usize, kind: MediaKind) -> PathBuf {
        self.dir
            .join(format!("media_temp_{}{}", index, kind.working_extension()))
    }

    /// Final inference output (before GIF re-encoding).
    pub fn swapped(&self, kind: MediaKind) -> PathBuf {
        self.dir.join(format!("media_out{}", kind.working_extension()))
    }

    /// Artifact uploaded as the task result.
    pub fn result(&self, kind: MediaKind) -> PathBuf {
        self.dir.join(format!("media_out{}", kind.result_extension()))
    }

    pub fn thumbnail(&self) -> PathBuf {
        self.dir.join(THUMBNAIL)
    }

    pub fn palette(&self) -> PathBuf {
        self.dir.join(PALETTE)
    }

    pub fn nsfw_marker(&self) -> PathBuf {
        self.dir.join(NSFW_MARKER)
    }

    /// Write the marker the inference engine checks before processing.
    pub async fn write_nsfw_marker(&self) -> MediaResult<()> {
        tokio::fs::write(self.nsfw_marker(), b"").await?;
        Ok(())
    }

    /// Delete every working file. Missing files are ignored.
    pub async fn cleanup(&self) -> MediaResult<usize> {
        let fixed: Vec<PathBuf> = [
            NSFW_MARKER,
            REFERENCE_FACE,
            BORDERED_FACE,
            THUMBNAIL,
            PALETTE,
            "media.gif",
            "media.png",
            "media.mp4",
            "media.jpg",
            "media_out.gif",
            "media_out.mp4",
            "media_out.jpg",
        ]
        .iter()
        .map(|name| self.dir.join(name))
        .collect();

        let mut removed = remove_files(fixed).await;
        for prefix in ["input.", "to_face_", "media_temp_"] {
            removed += remove_with_prefix(&self.dir, prefix).await?;
        }

        debug!("Removed {} working files from {}", removed, self.dir.display());
        Ok(removed)
    }
}
