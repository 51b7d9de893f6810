//! FFmpeg recipes for normalising inputs and encoding outputs.
//!
//! Each recipe only builds the command; running it is the caller's job so
//! every external process goes through the supervisor.

use std::path::Path;

use crate::command::FfmpegCommand;
use crate::watermark::{drawtext_filter, filter_chain, scale_filter, target_height};

/// Frame rate of every normalised video.
pub const OUTPUT_FPS: u32 = 24;

/// Inclusive cut window in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CutRange {
    pub start: i64,
    pub end: i64,
}

impl CutRange {
    /// A usable range, only when `end > start`.
    pub fn new(start: Option<i64>, end: Option<i64>) -> Option<Self> {
        let start = start.unwrap_or(0).max(0);
        let end = end?;
        (end > start).then_some(Self { start, end })
    }
}

/// Normalise a video: optional scale, watermark and cut, fixed frame rate.
pub fn convert_video(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    resolution: Option<i64>,
    watermark: Option<&str>,
    cut: Option<CutRange>,
) -> FfmpegCommand {
    let mut cmd = FfmpegCommand::new(input, output);

    if let Some(cut) = cut {
        cmd = cmd.cut(cut.start, cut.end);
    }

    let filters = filter_chain([
        target_height(resolution).map(scale_filter),
        drawtext_filter(watermark),
    ]);
    if let Some(filters) = filters {
        cmd = cmd.video_filter(filters);
    }

    cmd.frame_rate(OUTPUT_FPS)
}

/// Turn an animated GIF into an H.264-friendly MP4.
pub fn gif_to_video(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    watermark: Option<&str>,
) -> FfmpegCommand {
    let filters = filter_chain([
        Some("scale=trunc(iw/2)*2:trunc(ih/2)*2".to_string()),
        drawtext_filter(watermark),
    ])
    .unwrap_or_default();

    FfmpegCommand::new(input, output)
        .video_filter(filters)
        .pixel_format("yuv420p")
        .faststart()
}

/// Re-encode a still image, drawing the watermark when one is given.
pub fn watermark_image(
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    watermark: Option<&str>,
) -> FfmpegCommand {
    let cmd = FfmpegCommand::new(input, output).single_frame();
    match drawtext_filter(watermark) {
        Some(filter) => cmd.video_filter(filter),
        None => cmd,
    }
}

/// First pass of GIF encoding: build a palette.
pub fn gif_palette(input: impl AsRef<Path>, palette: impl AsRef<Path>) -> FfmpegCommand {
    FfmpegCommand::new(input, palette)
        .video_filter("fps=15,scale=500:-1:flags=lanczos,palettegen")
}

/// Second pass of GIF encoding: map frames onto the palette.
pub fn gif_encode(
    input: impl AsRef<Path>,
    palette: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> FfmpegCommand {
    FfmpegCommand::new(input, output)
        .extra_input(palette)
        .filter_graph("fps=10 [x]; [x][1:v] paletteuse")
}
