//! In-process duplex.
//!
//! Each side of [`pair`] is a sink/source couple; whatever one side sends the
//! other side receives, one whole message at a time. Dropping a sink ends the
//! opposite source's stream.

use std::sync::mpsc::{channel, Receiver, Sender};

use bytes::Bytes;

use crate::error::{Result, TransportError};
use crate::traits::{Message, MessageSink, MessageSource};

/// Sending half of an in-process duplex.
#[derive(Debug, Clone)]
pub struct MemorySink {
    tx: Sender<Message>,
}

/// Receiving half of an in-process duplex.
#[derive(Debug)]
pub struct MemorySource {
    rx: Receiver<Message>,
}

/// One end of an in-process duplex.
pub type MemoryEnd = (MemorySink, MemorySource);

/// Create two connected ends.
pub fn pair() -> (MemoryEnd, MemoryEnd) {
    let (left_tx, right_rx) = channel();
    let (right_tx, left_rx) = channel();
    (
        (MemorySink { tx: left_tx }, MemorySource { rx: left_rx }),
        (MemorySink { tx: right_tx }, MemorySource { rx: right_rx }),
    )
}

impl MessageSink for MemorySink {
    fn send(&mut self, channel: u16, payload: &[u8]) -> Result<()> {
        self.tx
            .send(Message::new(channel, Bytes::copy_from_slice(payload)))
            .map_err(|_| TransportError::Shutdown)
    }
}

impl MessageSource for MemorySource {
    fn recv(&mut self) -> Result<Option<Message>> {
        Ok(self.rx.recv().ok())
    }
}

impl MemorySource {
    /// Take a message if one is already queued, without blocking.
    pub fn try_recv(&mut self) -> Option<Message> {
        self.rx.try_recv().ok()
    }

    /// Drain every message queued so far.
    pub fn drain(&mut self) -> Vec<Message> {
        self.rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_cross_in_order() {
        let ((mut left_sink, mut left_source), (mut right_sink, mut right_source)) = pair();

        left_sink.send(1, b"first").unwrap();
        left_sink.send(3, b"second").unwrap();
        right_sink.send(2, b"reply").unwrap();

        let first = right_source.recv().unwrap().unwrap();
        let second = right_source.recv().unwrap().unwrap();
        assert_eq!((first.channel, first.payload.as_ref()), (1, b"first".as_ref()));
        assert_eq!((second.channel, second.payload.as_ref()), (3, b"second".as_ref()));

        let reply = left_source.recv().unwrap().unwrap();
        assert_eq!(reply, Message::new(2, Bytes::from_static(b"reply")));
    }

    #[test]
    fn dropping_sink_ends_stream() {
        let ((left_sink, _left_source), (_right_sink, mut right_source)) = pair();
        drop(left_sink);
        assert!(right_source.recv().unwrap().is_none());
    }

    #[test]
    fn send_after_peer_gone_is_shutdown() {
        let ((mut left_sink, _left_source), right) = pair();
        drop(right);
        assert!(matches!(left_sink.send(1, b"x"), Err(TransportError::Shutdown)));
    }

    #[test]
    fn drain_collects_pending() {
        let ((mut sink, _), (_, mut source)) = pair();
        sink.send(1, b"a").unwrap();
        sink.send(1, b"b").unwrap();
        let drained = source.drain();
        assert_eq!(drained.len(), 2);
        assert!(source.try_recv().is_none());
    }
}
