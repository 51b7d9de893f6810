//! External tool invocation for the face-swap worker.
//!
//! This crate provides:
//! - A supervisor that runs tools under an inactivity watchdog
//! - Progress parsing from FaceFusion output
//! - Command builders for FFmpeg, FaceFusion and ImageMagick
//! - Idempotent cleanup of working files

pub mod command;
pub mod error;
pub mod facefusion;
pub mod fs_utils;
pub mod image;
pub mod progress;
pub mod supervisor;
pub mod thumbnail;
pub mod transform;
pub mod watermark;

pub use command::{check_tool, FfmpegCommand, Invocation};
pub use error::{MediaError, MediaResult};
pub use facefusion::{swapper_model, FaceFusionCommand, FrameProcessor};
pub use image::{add_border, is_animated_webp, webp_to_gif};
pub use progress::extract_progress;
pub use supervisor::{
    ExitOutcome, LineSink, OutputLine, ProcessSupervisor, StreamKind, SupervisorConfig,
    SPAWN_FAILED_EXIT_CODE, STALL_EXIT_CODE,
};
pub use thumbnail::{image_thumbnail, video_thumbnail};
pub use transform::{convert_video, gif_encode, gif_palette, gif_to_video, watermark_image, CutRange};
