use env86_frame::TTY;
use env86_transport::MessageSink;

use crate::error::Result;
use crate::machine::{Machine, TTY_PORT};

/// End of input typed at a console (Ctrl-D).
pub const CTRL_D: u8 = 4;

/// Raw byte forwarding between serial port 0 and the control connection's
/// tty channel.
///
/// No framing: each output byte goes out as its own message, and every
/// inbound message is injected as is. An empty inbound message is the
/// remote end of stream.
#[derive(Debug, Default)]
pub struct TtyForwarder {
    bytes_out: u64,
    bytes_in: u64,
}

/// What an inbound tty message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtyInput {
    Forwarded,
    EndOfStream,
}

impl TtyForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward one byte of serial port 0 output.
    pub fn on_serial_byte<S: MessageSink + ?Sized>(
        &mut self,
        sink: &mut S,
        byte: u8,
    ) -> Result<()> {
        sink.send(TTY, &[byte])?;
        self.bytes_out += 1;
        Ok(())
    }

    /// Inject a tty message into serial port 0.
    pub fn on_transport_message<M: Machine + ?Sized>(
        &mut self,
        machine: &mut M,
        payload: &[u8],
    ) -> Result<TtyInput> {
        if payload.is_empty() {
            return Ok(TtyInput::EndOfStream);
        }
        machine.send_serial_bytes(TTY_PORT, payload)?;
        self.bytes_in += payload.len() as u64;
        Ok(TtyInput::Forwarded)
    }

    /// Bytes sent and received so far.
    pub fn totals(&self) -> (u64, u64) {
        (self.bytes_out, self.bytes_in)
    }
}

/// Watches console output for a byte pattern, even when the pattern is split
/// across several reads.
#[derive(Debug, Clone)]
pub struct ExitPatternWatch {
    pattern: Vec<u8>,
    tail: Vec<u8>,
    matched: bool,
}

impl ExitPatternWatch {
    /// `None` for an empty pattern, which would match anything.
    pub fn new(pattern: impl Into<Vec<u8>>) -> Option<Self> {
        let pattern = pattern.into();
        if pattern.is_empty() {
            return None;
        }
        Some(Self {
            tail: Vec::with_capacity(pattern.len() * 2),
            pattern,
            matched: false,
        })
    }

    pub fn pattern(&self) -> &[u8] {
        &self.pattern
    }

    /// Scan the next chunk of output. Returns true only for the chunk that
    /// completes the first match.
    pub fn feed(&mut self, chunk: &[u8]) -> bool {
        if self.matched {
            return false;
        }
        self.tail.extend_from_slice(chunk);
        if self
            .tail
            .windows(self.pattern.len())
            .any(|window| window == self.pattern.as_slice())
        {
            self.matched = true;
            self.tail.clear();
            return true;
        }
        let keep = self.pattern.len() - 1;
        if self.tail.len() > keep {
            self.tail.drain(..self.tail.len() - keep);
        }
        false
    }

    pub fn matched(&self) -> bool {
        self.matched
    }
}
