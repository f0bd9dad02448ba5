use std::path::PathBuf;

/// Errors raised by env86 transports.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Failed to bind the endpoint socket.
    #[error("failed to bind to {path}: {source}")]
    Bind {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to reach a listening endpoint.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on the stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The socket path does not fit in `sockaddr_un`.
    #[error("socket path too long ({len} bytes, max {max}): {path}")]
    PathTooLong {
        path: PathBuf,
        len: usize,
        max: usize,
    },

    /// The endpoint address cannot be used or derived.
    #[error("invalid endpoint '{0}'")]
    InvalidEndpoint(String),

    /// The message layer above the stream rejected the data.
    #[error("message codec error: {0}")]
    Codec(String),

    /// The other side of the duplex is gone.
    #[error("transport shut down")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, TransportError>;
