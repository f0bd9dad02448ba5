use tracing::{debug, warn};

use crate::error::Result;
use crate::fetch::Fetcher;

/// URLs of the initial-state chunks, in concatenation order.
pub fn chunk_urls(image_url: &str, parts: u32) -> Vec<String> {
    let base = image_url.trim_end_matches('/');
    (0..parts)
        .map(|i| format!("{base}/state/initial.state.{i}"))
        .collect()
}

/// Download every chunk and concatenate them in order.
///
/// Missing chunks are skipped; any other failure aborts the download.
pub fn download_chunks<F: Fetcher + ?Sized>(fetcher: &F, urls: &[String]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    for url in urls {
        match fetcher.get(url)? {
            Some(chunk) => {
                debug!(url = url.as_str(), size = chunk.len(), "state chunk");
                buffer.extend_from_slice(&chunk);
            }
            None => warn!(url = url.as_str(), "state chunk not found, skipping"),
        }
    }
    Ok(buffer)
}
