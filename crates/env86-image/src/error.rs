/// Errors raised while loading an image and building its boot configuration.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// An HTTP request failed outright (network error or non-404 status).
    #[error("fetch of {url} failed: {message}")]
    Http { url: String, message: String },

    /// The image has no `image.json`.
    #[error("no image.json found at {0}")]
    MissingManifest(String),

    /// `image.json` or a configuration value is not valid JSON for its shape.
    #[error("malformed manifest: {0}")]
    Manifest(#[from] serde_json::Error),

    /// The manifest parsed but carries a value that cannot be used.
    #[error("invalid manifest: {0}")]
    Invalid(String),

    /// A local image file could not be read.
    #[error("image I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ImageError>;
