//! Framing for env86.
//!
//! Two unrelated framings live here:
//!
//! - **Guest-service frames** arrive one byte at a time from a virtual serial
//!   port. [`catalog`] knows how long each message type is and
//!   [`FrameAssembler`] turns the byte stream back into whole [`Frame`]s.
//! - **Envelopes** wrap every message sent over a socket transport:
//!   2-byte magic ("EV"), 4-byte little-endian length, 2-byte little-endian
//!   channel, payload. [`EnvelopeReader`] and [`EnvelopeWriter`] implement
//!   the transport's message traits on top of any byte stream.

pub mod assembler;
pub mod catalog;
pub mod channel;
pub mod codec;
pub mod error;
pub mod reader;
pub mod writer;

pub use assembler::{
    AssemblyState, Frame, FrameAssembler, Malformed, MalformedReason, Step, DEFAULT_MAX_DATA_PAYLOAD,
};
pub use catalog::{size_for, FrameSize, MessageType, DATA_HEADER_SIZE, DATA_LENGTH_OFFSET};
pub use channel::{channel_name, GUEST, RPC, TTY, USER_CHANNEL_START};
pub use codec::{
    decode_envelope, encode_envelope, EnvelopeConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use reader::EnvelopeReader;
pub use writer::EnvelopeWriter;
