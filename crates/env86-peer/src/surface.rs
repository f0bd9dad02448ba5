use std::collections::BTreeMap;

use env86_frame::{channel_name, DEFAULT_MAX_PAYLOAD, RPC, TTY};
use env86_image::{BootOptions, DEFAULT_GUEST_PORT};
use env86_transport::{guest_endpoint, Message, MessageSink};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::bridge::ChannelBridge;
use crate::error::{PeerError, Result};
use crate::handlers::HandlerTable;
use crate::machine::{Machine, VmEvent, TTY_PORT};
use crate::rpc::{CallIds, RpcMessage, OP_LOADED, OP_TTY};
use crate::tty::{TtyForwarder, TtyInput};

/// Sink half of a guest-service connection.
pub type GuestSink = Box<dyn MessageSink + Send>;

/// Opens the guest-service transport once the machine has loaded.
pub trait GuestConnector {
    /// Connect to `endpoint`. Whatever arrives on the connection must be
    /// delivered back to the session as guest events.
    fn connect(&mut self, endpoint: &str) -> Result<GuestSink>;

    /// Largest envelope payload the returned sink accepts.
    fn max_payload(&self) -> usize {
        DEFAULT_MAX_PAYLOAD
    }
}

/// For sessions without a guest service.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGuestService;

impl GuestConnector for NoGuestService {
    fn connect(&mut self, endpoint: &str) -> Result<GuestSink> {
        Err(PeerError::Protocol(format!(
            "guest service not available for {endpoint}"
        )))
    }
}

/// Calls awaiting a reply that are remembered for logging; older ones are forgotten.
pub const MAX_PENDING_CALLS: usize = 256;

/// Which optional features the surface turns on at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurfaceConfig {
    pub control_url: Option<String>,
    pub enable_tty: bool,
    pub guest_service: bool,
    pub guest_port: u8,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            control_url: None,
            enable_tty: false,
            guest_service: false,
            guest_port: DEFAULT_GUEST_PORT,
        }
    }
}

impl From<&BootOptions> for SurfaceConfig {
    fn from(options: &BootOptions) -> Self {
        Self {
            control_url: options.control_url.clone(),
            enable_tty: options.enable_tty,
            guest_service: options.guest_service,
            guest_port: options.guest_port,
        }
    }
}

/// The VM side of a control connection.
///
/// Answers the controller's calls through a [`HandlerTable`], and on the
/// machine's first `Loaded` event announces itself and attaches the tty
/// forwarder and the guest-service bridge. Serial output is fanned out to
/// both; each keeps its own state.
///
/// Errors returned from the `on_*` methods mean the control connection is
/// unusable. Everything else is logged and absorbed.
pub struct ControlSurface<M, C, K> {
    machine: M,
    handlers: HandlerTable<M>,
    control: C,
    connector: K,
    config: SurfaceConfig,
    ids: CallIds,
    pending: BTreeMap<u64, String>,
    loaded: bool,
    tty: Option<TtyForwarder>,
    bridge: Option<ChannelBridge<GuestSink>>,
}

impl<M, C, K> ControlSurface<M, C, K>
where
    M: Machine,
    C: MessageSink,
    K: GuestConnector,
{
    pub fn new(machine: M, control: C, connector: K, config: SurfaceConfig) -> Self {
        Self {
            machine,
            handlers: HandlerTable::standard(),
            control,
            connector,
            config,
            ids: CallIds::default(),
            pending: BTreeMap::new(),
            loaded: false,
            tty: None,
            bridge: None,
        }
    }

    /// Continue numbering outgoing calls from an earlier exchange.
    pub fn with_call_ids(mut self, ids: CallIds) -> Self {
        self.ids = ids;
        self
    }

    /// Replace the handler table.
    pub fn with_handlers(mut self, handlers: HandlerTable<M>) -> Self {
        self.handlers = handlers;
        self
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    pub fn connector_mut(&mut self) -> &mut K {
        &mut self.connector
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn tty_attached(&self) -> bool {
        self.tty.is_some()
    }

    pub fn bridge(&self) -> Option<&ChannelBridge<GuestSink>> {
        self.bridge.as_ref()
    }

    /// Outgoing calls the controller has not answered yet.
    pub fn pending_calls(&self) -> usize {
        self.pending.len()
    }

    pub fn on_vm_event(&mut self, event: VmEvent) -> Result<()> {
        match event {
            VmEvent::Loaded => self.on_loaded(),
            VmEvent::SerialByte { port, byte } => self.on_serial_byte(port, byte),
        }
    }

    fn on_loaded(&mut self) -> Result<()> {
        if self.loaded {
            warn!("machine reported loaded twice, ignoring");
            return Ok(());
        }
        self.loaded = true;
        info!("machine loaded");
        self.call(OP_LOADED, Vec::new())?;

        if self.config.enable_tty && self.tty.is_none() {
            self.call(OP_TTY, Vec::new())?;
            self.tty = Some(TtyForwarder::new());
            debug!(port = TTY_PORT, "tty forwarding attached");
        }

        if self.config.guest_service {
            match self.open_guest() {
                Ok(sink) => {
                    info!(port = self.config.guest_port, "guest service bridged");
                    self.bridge = Some(ChannelBridge::for_envelope_limit(
                        self.config.guest_port,
                        sink,
                        self.connector.max_payload(),
                    ));
                }
                Err(err) => warn!(error = %err, "guest service unavailable"),
            }
        }
        Ok(())
    }

    fn open_guest(&mut self) -> Result<GuestSink> {
        let control_url = self.config.control_url.as_deref().ok_or_else(|| {
            PeerError::Protocol("guest service needs a control endpoint".to_string())
        })?;
        let endpoint = guest_endpoint(control_url)?;
        self.connector.connect(&endpoint)
    }

    fn on_serial_byte(&mut self, port: u8, byte: u8) -> Result<()> {
        if port == TTY_PORT {
            if let Some(tty) = self.tty.as_mut() {
                tty.on_serial_byte(&mut self.control, byte)?;
            }
        }

        let bridge_failed = match self.bridge.as_mut() {
            Some(bridge) if bridge.port() == port => bridge.on_serial_byte(byte).err(),
            _ => None,
        };
        if let Some(err) = bridge_failed {
            warn!(error = %err, "guest transport failed, dropping bridge");
            self.bridge = None;
        }
        Ok(())
    }

    /// Handle one message from the controller.
    pub fn on_control_message(&mut self, message: Message) -> Result<()> {
        match message.channel {
            RPC => self.on_rpc(&message.payload),
            TTY => {
                self.on_tty(&message.payload);
                Ok(())
            }
            other => {
                warn!(channel = other, name = channel_name(other), "unexpected control channel");
                Ok(())
            }
        }
    }

    fn on_rpc(&mut self, payload: &[u8]) -> Result<()> {
        let message = match RpcMessage::decode(payload) {
            Ok(message) => message,
            Err(err) => {
                warn!(error = %err, "undecodable control message");
                return Ok(());
            }
        };

        match message {
            RpcMessage::Call { id, op, args } => {
                let reply = match self.handlers.dispatch(&mut self.machine, &op, &args) {
                    Ok(result) => {
                        debug!(id, op = op.as_str(), "call handled");
                        RpcMessage::ok(id, result)
                    }
                    Err(err) => {
                        warn!(id, op = op.as_str(), error = %err, "call failed");
                        RpcMessage::err(id, err.to_string())
                    }
                };
                self.control.send(RPC, &reply.encode()?)?;
            }
            RpcMessage::Reply { id, error, .. } => {
                let op = self.pending.remove(&id).unwrap_or_else(|| "?".to_string());
                match error {
                    Some(error) => warn!(
                        id,
                        op = op.as_str(),
                        error = error.as_str(),
                        "call rejected by controller"
                    ),
                    None => debug!(id, op = op.as_str(), "call acknowledged"),
                }
            }
        }
        Ok(())
    }

    fn on_tty(&mut self, payload: &[u8]) {
        let Some(tty) = self.tty.as_mut() else {
            debug!(size = payload.len(), "tty input without forwarding, dropped");
            return;
        };
        match tty.on_transport_message(&mut self.machine, payload) {
            Ok(TtyInput::Forwarded) => {}
            Ok(TtyInput::EndOfStream) => {
                let (out, inp) = tty.totals();
                info!(bytes_out = out, bytes_in = inp, "tty stream ended");
                self.tty = None;
            }
            Err(err) => warn!(error = %err, "tty input not delivered"),
        }
    }

    /// Handle one message from the guest-service transport.
    pub fn on_guest_message(&mut self, payload: &[u8]) {
        match self.bridge.as_mut() {
            Some(bridge) => {
                if let Err(err) = bridge.on_transport_message(&mut self.machine, payload) {
                    warn!(error = %err, "guest frame not delivered");
                }
            }
            None => debug!(size = payload.len(), "guest message without a bridge, dropped"),
        }
    }

    /// The guest-service transport reached end of stream.
    pub fn on_guest_closed(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            let stats = bridge.stats();
            info!(
                frames_out = stats.frames_out,
                messages_in = stats.messages_in,
                malformed = stats.malformed,
                "guest service closed"
            );
        }
    }

    /// Fire a call at the controller without waiting for the reply.
    pub fn call(&mut self, op: &str, args: Vec<Value>) -> Result<u64> {
        let id = self.ids.next_id();
        self.control
            .send(RPC, &RpcMessage::call(id, op, args).encode()?)?;
        if self.pending.len() >= MAX_PENDING_CALLS {
            if let Some((oldest, op)) = self.pending.pop_first() {
                debug!(id = oldest, op = op.as_str(), "no reply from controller, forgetting call");
            }
        }
        self.pending.insert(id, op.to_string());
        Ok(id)
    }

    pub fn into_machine(self) -> M {
        self.machine
    }
}
