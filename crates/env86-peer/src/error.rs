/// Errors that can occur on either side of a control connection.
#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] env86_transport::TransportError),

    /// Envelope-level error.
    #[error("frame error: {0}")]
    Frame(#[from] env86_frame::FrameError),

    /// Image or boot configuration error.
    #[error("image error: {0}")]
    Image(#[from] env86_image::ImageError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Thread spawn or other local I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No handler is registered under this operation name.
    #[error("unknown operation '{0}'")]
    UnknownOperation(String),

    /// The call's arguments do not fit the operation.
    #[error("bad arguments for '{op}': {message}")]
    BadArguments { op: String, message: String },

    /// The machine refused or failed an operation.
    #[error("machine error: {0}")]
    Machine(String),

    /// The remote side answered a call with an error.
    #[error("remote error: {0}")]
    Remote(String),

    /// A message arrived that does not fit the conversation.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),
}

pub type Result<T> = std::result::Result<T, PeerError>;
