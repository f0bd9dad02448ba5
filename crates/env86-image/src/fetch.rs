use std::io::Read;
use std::path::PathBuf;

use tracing::debug;

use crate::error::{ImageError, Result};

/// Fetches image resources by URL.
///
/// `Ok(None)` means the resource does not exist (HTTP 404 or a missing
/// file). Every other failure is an error.
pub trait Fetcher {
    fn get(&self, url: &str) -> Result<Option<Vec<u8>>>;
}

impl<F: Fetcher + ?Sized> Fetcher for &F {
    fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(url)
    }
}

impl<F: Fetcher + ?Sized> Fetcher for Box<F> {
    fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        (**self).get(url)
    }
}

/// Plain HTTP(S) GET via `ureq`.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpFetcher;

impl Fetcher for HttpFetcher {
    fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        debug!(url, "GET");
        let resp = match ureq::get(url).call() {
            Ok(resp) => resp,
            Err(ureq::Error::StatusCode(404)) => return Ok(None),
            Err(err) => {
                return Err(ImageError::Http {
                    url: url.to_string(),
                    message: err.to_string(),
                })
            }
        };

        let mut body = Vec::new();
        resp.into_body()
            .into_reader()
            .read_to_end(&mut body)
            .map_err(|err| ImageError::Http {
                url: url.to_string(),
                message: err.to_string(),
            })?;
        Ok(Some(body))
    }
}

/// Reads images laid out in a local directory (`file://` URLs or bare paths).
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalFetcher;

impl Fetcher for LocalFetcher {
    fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        let path = local_path(url);
        debug!(path = %path.display(), "read");
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ImageError::Io(err)),
        }
    }
}

/// Picks [`HttpFetcher`] or [`LocalFetcher`] from the URL scheme.
#[derive(Debug, Default, Clone, Copy)]
pub struct AnyFetcher;

impl Fetcher for AnyFetcher {
    fn get(&self, url: &str) -> Result<Option<Vec<u8>>> {
        if is_http(url) {
            HttpFetcher.get(url)
        } else {
            LocalFetcher.get(url)
        }
    }
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn local_path(url: &str) -> PathBuf {
    PathBuf::from(url.strip_prefix("file://").unwrap_or(url))
}
