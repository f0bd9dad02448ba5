use bytes::Bytes;

use crate::error::Result;

/// One whole application message, tagged with the channel it travels on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Channel the message belongs to.
    pub channel: u16,
    /// Message body, delivered exactly as it was sent.
    pub payload: Bytes,
}

impl Message {
    /// Create a new message.
    pub fn new(channel: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            channel,
            payload: payload.into(),
        }
    }
}

/// The sending half of a message-boundary-preserving duplex.
pub trait MessageSink {
    /// Send `payload` as one message on `channel`.
    fn send(&mut self, channel: u16, payload: &[u8]) -> Result<()>;
}

/// The receiving half of a message-boundary-preserving duplex.
pub trait MessageSource {
    /// Block until the next whole message arrives.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream.
    fn recv(&mut self) -> Result<Option<Message>>;
}

impl<T: MessageSink + ?Sized> MessageSink for &mut T {
    fn send(&mut self, channel: u16, payload: &[u8]) -> Result<()> {
        (**self).send(channel, payload)
    }
}

impl<T: MessageSink + ?Sized> MessageSink for Box<T> {
    fn send(&mut self, channel: u16, payload: &[u8]) -> Result<()> {
        (**self).send(channel, payload)
    }
}

impl<T: MessageSource + ?Sized> MessageSource for &mut T {
    fn recv(&mut self) -> Result<Option<Message>> {
        (**self).recv()
    }
}

impl<T: MessageSource + ?Sized> MessageSource for Box<T> {
    fn recv(&mut self) -> Result<Option<Message>> {
        (**self).recv()
    }
}
