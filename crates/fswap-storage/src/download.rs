//! Streaming downloads of task inputs.

use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{StorageError, StorageResult};

/// Silence allowed before the response headers and between body chunks.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Download `url` to `path`, returning the number of bytes written.
///
/// Non-2xx responses are errors. A partially written file is removed.
pub async fn download_file(client: &Client, url: &str, path: impl AsRef<Path>) -> StorageResult<u64> {
    download_file_with_idle_timeout(client, url, path, DEFAULT_IDLE_TIMEOUT).await
}

/// Like [`download_file`], giving up with [`StorageError::Stalled`] when the
/// server sends nothing for `idle_timeout`.
pub async fn download_file_with_idle_timeout(
    client: &Client,
    url: &str,
    path: impl AsRef<Path>,
    idle_timeout: Duration,
) -> StorageResult<u64> {
    let path = path.as_ref();
    debug!("Downloading {} to {}", url, path.display());

    let response = tokio::time::timeout(idle_timeout, client.get(url).send())
        .await
        .map_err(|_| StorageError::Stalled(idle_timeout))??;
    let status = response.status();
    if !status.is_success() {
        return Err(StorageError::download_failed(format!(
            "{} returned HTTP {}",
            url,
            status.as_u16()
        )));
    }

    match write_body(response, path, idle_timeout).await {
        Ok(bytes) => {
            info!("Downloaded {} ({} bytes)", path.display(), bytes);
            Ok(bytes)
        }
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(path).await {
                if remove_err.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to remove partial {}: {}", path.display(), remove_err);
                }
            }
            Err(e)
        }
    }
}

async fn write_body(response: reqwest::Response, path: &Path, idle_timeout: Duration) -> StorageResult<u64> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut stream = response.bytes_stream();
    let mut written: u64 = 0;

    loop {
        let chunk = tokio::time::timeout(idle_timeout, stream.next())
            .await
            .map_err(|_| StorageError::Stalled(idle_timeout))?;
        let Some(chunk) = chunk else {
            break;
        };
        let data = chunk?;
        file.write_all(&data).await?;
        written += data.len() as u64;
    }

    file.flush().await?;
    Ok(written)
}
