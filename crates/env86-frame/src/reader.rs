use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use env86_transport::{IpcStream, Message, MessageSource};

use crate::codec::{decode_envelope, EnvelopeConfig};
use crate::error::{transport_to_frame_error, FrameError, Result};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads whole envelopes from any `Read` stream.
///
/// Partial reads are absorbed internally; callers only see complete messages.
pub struct EnvelopeReader<T> {
    inner: T,
    buf: BytesMut,
    config: EnvelopeConfig,
}

impl<T: Read> EnvelopeReader<T> {
    /// Create a reader with the default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, EnvelopeConfig::default())
    }

    /// Create a reader with an explicit configuration.
    pub fn with_config(inner: T, config: EnvelopeConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Block until the next whole envelope is available.
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` at end of stream.
    pub fn read_envelope(&mut self) -> Result<Message> {
        loop {
            if let Some(message) = decode_envelope(&mut self.buf, self.config.max_payload_size)? {
                return Ok(message);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };
            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }
            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Whether a partial envelope is sitting in the buffer.
    pub fn has_partial(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update the maximum payload size for subsequent envelopes.
    pub fn set_max_payload_size(&mut self, max_payload_size: usize) {
        self.config.max_payload_size = max_payload_size;
    }
}

impl EnvelopeReader<IpcStream> {
    /// Create a reader for a socket stream and apply the configured read timeout.
    pub fn for_stream(inner: IpcStream, config: EnvelopeConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_frame_error)?;
        Ok(Self::with_config(inner, config))
    }
}

impl<T: Read> MessageSource for EnvelopeReader<T> {
    fn recv(&mut self) -> env86_transport::Result<Option<Message>> {
        match self.read_envelope() {
            Ok(message) => Ok(Some(message)),
            Err(FrameError::ConnectionClosed) if !self.has_partial() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
