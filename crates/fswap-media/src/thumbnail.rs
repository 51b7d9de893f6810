//! Thumbnail generation.

use std::path::Path;

use crate::command::FfmpegCommand;

/// Thumbnails never exceed this width; smaller sources keep their size.
pub const THUMBNAIL_MAX_WIDTH: u32 = 512;

fn thumbnail_filter() -> String {
    format!("scale='min({},iw)':-1", THUMBNAIL_MAX_WIDTH)
}

/// Thumbnail from the first frame of a video.
pub fn video_thumbnail(video_path: impl AsRef<Path>, output_path: impl AsRef<Path>) -> FfmpegCommand {
    FfmpegCommand::new(video_path, output_path)
        .single_frame()
        .video_filter(thumbnail_filter())
        .log_level("error")
}

/// Downscaled copy of a still image.
pub fn image_thumbnail(image_path: impl AsRef<Path>, output_path: impl AsRef<Path>) -> FfmpegCommand {
    FfmpegCommand::new(image_path, output_path)
        .video_filter(thumbnail_filter())
        .log_level("error")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thumbnail_filter() {
        let args = video_thumbnail("media_out.mp4", "thumb_media.jpg").build_args();
        assert!(args.contains(&"scale='min(512,iw)':-1".to_string()));
        assert!(args.contains(&"-vframes".to_string()));

        let args = image_thumbnail("media_out.jpg", "thumb_media.jpg").build_args();
        assert!(!args.contains(&"-vframes".to_string()));
        assert_eq!(args.last().unwrap(), "thumb_media.jpg");
    }
}
