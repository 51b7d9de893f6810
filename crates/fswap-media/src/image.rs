//! ImageMagick helpers and WebP inspection.

use std::path::Path;

use tokio::io::AsyncReadExt;

use crate::command::Invocation;
use crate::error::{MediaError, MediaResult};

/// Border width around target faces, relative to the image size.
pub const BORDER_PERCENT: u32 = 25;

/// Pad an image with a black border so the detector sees the whole face.
pub fn add_border(program: &str, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Invocation {
    Invocation::new(program)
        .path_arg(input)
        .args(["-bordercolor", "black", "-border"])
        .arg(format!("{}%", BORDER_PERCENT))
        .path_arg(output)
}

/// Convert an (animated) WebP to GIF.
pub fn webp_to_gif(program: &str, input: impl AsRef<Path>, output: impl AsRef<Path>) -> Invocation {
    Invocation::new(program).path_arg(input).path_arg(output)
}

/// Bytes of header inspected; the VP8X and ANIM chunks sit at the front.
const WEBP_HEADER_LIMIT: usize = 4096;

/// Whether the file is an animated WebP.
pub async fn is_animated_webp(path: impl AsRef<Path>) -> MediaResult<bool> {
    let path = path.as_ref();
    let file = tokio::fs::File::open(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MediaError::FileNotFound(path.to_path_buf())
        } else {
            MediaError::Io(e)
        }
    })?;

    let mut header = Vec::with_capacity(WEBP_HEADER_LIMIT);
    file.take(WEBP_HEADER_LIMIT as u64)
        .read_to_end(&mut header)
        .await?;

    Ok(webp_is_animated(&header))
}

/// Walk the RIFF chunks looking for the VP8X animation flag or an ANIM chunk.
pub fn webp_is_animated(data: &[u8]) -> bool {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WEBP" {
        return false;
    }

    let mut offset: usize = 12;
    while offset.checked_add(8).is_some_and(|end| end <= data.len()) {
        let fourcc = &data[offset..offset + 4];
        let size = u32::from_le_bytes([
            data[offset + 4],
            data[offset + 5],
            data[offset + 6],
            data[offset + 7],
        ]) as usize;
        let body = offset + 8;

        match fourcc {
            b"VP8X" => {
                if let Some(flags) = data.get(body) {
                    if flags & 0x02 != 0 {
                        return true;
                    }
                }
            }
            b"ANIM" | b"ANMF" => return true,
            _ => {}
        }

        // Chunks are padded to an even size.
        match body.checked_add(size).and_then(|end| end.checked_add(size & 1)) {
            Some(next) => offset = next,
            None => break,
        }
    }

    false
}
