use std::cmp::Ordering;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::catalog::{size_for, FrameSize, MessageType, DATA_HEADER_SIZE};
use crate::codec::DEFAULT_MAX_PAYLOAD;

/// A complete guest-service frame: type byte first, exact catalog length.
///
/// Only [`FrameAssembler`] creates frames, so a `Frame` is never partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    message_type: MessageType,
    bytes: Bytes,
}

impl Frame {
    /// The frame's message type.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The frame exactly as it appeared on the serial port.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; kept for symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The big-endian channel id following the type byte.
    pub fn channel_id(&self) -> u32 {
        u32::from_be_bytes([self.bytes[1], self.bytes[2], self.bytes[3], self.bytes[4]])
    }

    /// Data payload, for data frames only.
    pub fn payload(&self) -> Option<&[u8]> {
        match self.message_type {
            MessageType::Data => Some(&self.bytes[DATA_HEADER_SIZE..]),
            _ => None,
        }
    }

    /// Consume the frame, returning its bytes.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

/// Why buffered bytes were thrown away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// The candidate type byte is not in the catalog.
    UnknownType(u8),
    /// A data frame declared a payload above the assembler's limit.
    Oversized { declared: usize, max: usize },
    /// More bytes were buffered than the frame's target size.
    Overrun { target: usize, buffered: usize },
}

impl std::fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownType(byte) => write!(f, "unknown message type {byte}"),
            Self::Oversized { declared, max } => {
                write!(f, "data payload of {declared} bytes exceeds {max}")
            }
            Self::Overrun { target, buffered } => {
                write!(f, "buffered {buffered} bytes for a {target}-byte frame")
            }
        }
    }
}

/// A discarded partial frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malformed {
    pub reason: MalformedReason,
    pub discarded: Bytes,
}

/// Outcome of feeding one byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// More bytes are needed.
    Pending,
    /// A frame just completed; the assembler is empty again.
    Frame(Frame),
    /// The buffered bytes were dropped; the next byte starts a fresh frame.
    Malformed(Malformed),
}

/// Whether a frame is in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyState {
    Empty,
    Accumulating,
}

/// Largest data payload whose whole frame, header included, still fits in
/// one envelope of [`DEFAULT_MAX_PAYLOAD`] bytes.
pub const DEFAULT_MAX_DATA_PAYLOAD: usize = DEFAULT_MAX_PAYLOAD - DATA_HEADER_SIZE;

/// Reassembles guest-service frames from a serial byte stream.
///
/// Bytes are pushed one at a time in emission order. The assembler only
/// ever looks back at bytes it already holds; there is no lookahead.
/// One assembler serves exactly one serial stream.
#[derive(Debug)]
pub struct FrameAssembler {
    buf: BytesMut,
    max_payload: usize,
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAssembler {
    /// Create an assembler whose frames always fit a default-sized envelope.
    pub fn new() -> Self {
        Self::with_max_payload(DEFAULT_MAX_DATA_PAYLOAD)
    }

    /// Create an assembler whose frames fit envelopes carrying at most
    /// `max_envelope_payload` bytes.
    pub fn for_envelope_limit(max_envelope_payload: usize) -> Self {
        Self::with_max_payload(max_envelope_payload.saturating_sub(DATA_HEADER_SIZE))
    }

    /// Create an assembler that rejects data frames declaring more than `max_payload` bytes.
    pub fn with_max_payload(max_payload: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(DATA_HEADER_SIZE),
            max_payload,
        }
    }

    /// Current state.
    pub fn state(&self) -> AssemblyState {
        if self.buf.is_empty() {
            AssemblyState::Empty
        } else {
            AssemblyState::Accumulating
        }
    }

    /// Number of bytes held for the frame in progress.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Feed one byte from the serial port.
    ///
    /// The type byte is classified as soon as it arrives, so an unknown byte
    /// is discarded on its own and the very next byte is a fresh candidate.
    pub fn push(&mut self, byte: u8) -> Step {
        self.buf.extend_from_slice(&[byte]);
        let type_byte = self.buf[0];

        let target = match size_for(type_byte, &self.buf) {
            FrameSize::AwaitingLength => return Step::Pending,
            FrameSize::Unknown => return self.discard(MalformedReason::UnknownType(type_byte)),
            FrameSize::Known(target) => target,
        };

        let Some(message_type) = MessageType::from_byte(type_byte) else {
            return self.discard(MalformedReason::UnknownType(type_byte));
        };
        if message_type == MessageType::Data {
            let declared = target - DATA_HEADER_SIZE;
            if declared > self.max_payload {
                return self.discard(MalformedReason::Oversized {
                    declared,
                    max: self.max_payload,
                });
            }
        }

        match self.buf.len().cmp(&target) {
            Ordering::Less => Step::Pending,
            Ordering::Equal => {
                let bytes = self.buf.split().freeze();
                trace!(size = bytes.len(), kind = message_type.name(), "guest frame assembled");
                Step::Frame(Frame {
                    message_type,
                    bytes,
                })
            }
            // Only reachable when the buffer was filled past the target
            // outside `push`; resync rather than emit a torn frame.
            Ordering::Greater => self.discard(MalformedReason::Overrun {
                target,
                buffered: self.buf.len(),
            }),
        }
    }

    /// Feed a run of bytes, collecting every completed frame and discard.
    pub fn push_all(&mut self, bytes: &[u8]) -> Vec<Step> {
        bytes
            .iter()
            .map(|&byte| self.push(byte))
            .filter(|step| !matches!(step, Step::Pending))
            .collect()
    }

    fn discard(&mut self, reason: MalformedReason) -> Step {
        let discarded = self.buf.split().freeze();
        Step::Malformed(Malformed { reason, discarded })
    }
}
