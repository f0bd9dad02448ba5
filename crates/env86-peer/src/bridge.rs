use env86_frame::{FrameAssembler, Step, GUEST};
use env86_transport::MessageSink;
use tracing::{debug, warn};

use crate::error::Result;
use crate::machine::Machine;

/// Frame counters for one bridge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    /// Frames sent to the transport.
    pub frames_out: u64,
    /// Transport messages injected into the serial port.
    pub messages_in: u64,
    /// Partial frames thrown away.
    pub malformed: u64,
}

/// Bridges guest-service frames between one serial port and a transport.
///
/// Serial output is reassembled into whole frames before it is sent; each
/// transport message is already a whole frame and is injected as is.
pub struct ChannelBridge<S> {
    port: u8,
    assembler: FrameAssembler,
    sink: S,
    stats: BridgeStats,
}

impl<S: MessageSink> ChannelBridge<S> {
    pub fn new(port: u8, sink: S) -> Self {
        Self::with_assembler(port, sink, FrameAssembler::new())
    }

    /// Create a bridge whose frames never exceed what `sink` accepts in one
    /// envelope of `max_envelope_payload` bytes.
    pub fn for_envelope_limit(port: u8, sink: S, max_envelope_payload: usize) -> Self {
        Self::with_assembler(
            port,
            sink,
            FrameAssembler::for_envelope_limit(max_envelope_payload),
        )
    }

    pub fn with_assembler(port: u8, sink: S, assembler: FrameAssembler) -> Self {
        Self {
            port,
            assembler,
            sink,
            stats: BridgeStats::default(),
        }
    }

    /// The serial port this bridge listens on and writes to.
    pub fn port(&self) -> u8 {
        self.port
    }

    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    /// Feed one byte of serial output.
    ///
    /// Malformed input is logged and dropped. Only a failing transport is an error.
    pub fn on_serial_byte(&mut self, byte: u8) -> Result<()> {
        match self.assembler.push(byte) {
            Step::Pending => Ok(()),
            Step::Frame(frame) => {
                debug!(
                    port = self.port,
                    kind = frame.message_type().name(),
                    size = frame.len(),
                    "guest frame out"
                );
                self.sink.send(GUEST, frame.as_bytes())?;
                self.stats.frames_out += 1;
                Ok(())
            }
            Step::Malformed(malformed) => {
                warn!(
                    port = self.port,
                    reason = %malformed.reason,
                    discarded = malformed.discarded.len(),
                    "dropping malformed guest frame"
                );
                self.stats.malformed += 1;
                Ok(())
            }
        }
    }

    /// Inject one transport message into the serial port.
    pub fn on_transport_message<M: Machine + ?Sized>(
        &mut self,
        machine: &mut M,
        payload: &[u8],
    ) -> Result<()> {
        machine.send_serial_bytes(self.port, payload)?;
        self.stats.messages_in += 1;
        Ok(())
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}
