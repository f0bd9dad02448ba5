use env86_frame::{channel_name, RPC, TTY};
use env86_transport::{Message, MessageSink, MessageSource};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::rpc::{
    bytes_to_value, reply_outcome, value_to_bytes, CallIds, RpcMessage, OP_CONFIG, OP_LOADED,
    OP_LOG, OP_MAC, OP_PAUSE, OP_RESTORE, OP_SAVE, OP_SCREENSHOT, OP_SEND_KEYBOARD,
    OP_SET_FULLSCREEN, OP_SET_SCALE, OP_TTY, OP_UNPAUSE,
};
use crate::tty::ExitPatternWatch;

/// Console output kept for [`RemoteVm::take_tty_output`] before the oldest
/// bytes are dropped.
pub const DEFAULT_TTY_BUFFER: usize = 64 * 1024;

/// A reply as read off the wire: id, result, error.
type Reply = (u64, Option<Value>, Option<String>);

/// The host's handle on a VM that connected to its control endpoint.
///
/// Incoming calls from the VM (`config`, `loaded`, `tty`, `log`) are
/// answered whenever the handle reads from the connection, including while
/// it waits for the reply to one of its own calls.
pub struct RemoteVm<S, R> {
    sink: S,
    source: R,
    ids: CallIds,
    config: Value,
    loaded: bool,
    tty_open: bool,
    tty_output: Vec<u8>,
    tty_limit: usize,
    tty_dropped: u64,
    exit_watch: Option<ExitPatternWatch>,
}

impl<S: MessageSink, R: MessageSource> RemoteVm<S, R> {
    pub fn new(sink: S, source: R) -> Self {
        Self {
            sink,
            source,
            ids: CallIds::default(),
            config: json!({}),
            loaded: false,
            tty_open: false,
            tty_output: Vec::new(),
            tty_limit: DEFAULT_TTY_BUFFER,
            tty_dropped: 0,
            exit_watch: None,
        }
    }

    /// Overrides handed to the VM when it asks for `config`.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Keep at most `limit` bytes of unread console output. Zero keeps none.
    pub fn with_tty_buffer_limit(mut self, limit: usize) -> Self {
        self.tty_limit = limit;
        self
    }

    /// Watch console output for `pattern`; see [`RemoteVm::exit_detected`].
    pub fn with_exit_pattern(mut self, pattern: impl Into<Vec<u8>>) -> Self {
        self.exit_watch = ExitPatternWatch::new(pattern);
        self
    }

    /// Whether the exit pattern has appeared on the console.
    pub fn exit_detected(&self) -> bool {
        self.exit_watch.as_ref().is_some_and(ExitPatternWatch::matched)
    }

    /// Console bytes dropped because nobody took them in time.
    pub fn tty_dropped(&self) -> u64 {
        self.tty_dropped
    }

    pub fn source(&self) -> &R {
        &self.source
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn tty_open(&self) -> bool {
        self.tty_open
    }

    /// Serial console output received so far, draining the buffer.
    pub fn take_tty_output(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.tty_output)
    }

    /// Type into the VM's serial console.
    pub fn send_tty(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        self.sink.send(TTY, bytes)?;
        Ok(())
    }

    /// Send a bare newline so a restored guest redraws its prompt.
    pub fn nudge_prompt(&mut self) -> Result<()> {
        self.send_tty(b"\n")
    }

    /// End the console stream towards the VM.
    pub fn close_tty(&mut self) -> Result<()> {
        self.sink.send(TTY, &[])?;
        Ok(())
    }

    /// Read and handle messages until the VM reports it has loaded.
    pub fn wait_loaded(&mut self) -> Result<()> {
        while !self.loaded {
            let message = self.next_message()?;
            if let Some((id, _, _)) = self.handle(message)? {
                debug!(id, "reply with no call outstanding");
            }
        }
        Ok(())
    }

    /// Read and handle exactly one message.
    pub fn handle_next(&mut self) -> Result<()> {
        let message = self.next_message()?;
        if let Some((id, _, _)) = self.handle(message)? {
            debug!(id, "reply with no call outstanding");
        }
        Ok(())
    }

    /// Call `op` on the VM and wait for its reply.
    pub fn call(&mut self, op: &str, args: Vec<Value>) -> Result<Value> {
        let id = self.ids.next_id();
        self.sink
            .send(RPC, &RpcMessage::call(id, op, args).encode()?)?;
        debug!(id, op, "call sent");

        loop {
            let message = self.next_message()?;
            match self.handle(message)? {
                Some((reply_id, result, error)) if reply_id == id => {
                    return reply_outcome(result, error);
                }
                Some((stale, _, _)) => debug!(id = stale, "ignoring stale reply"),
                None => {}
            }
        }
    }

    pub fn pause(&mut self) -> Result<()> {
        self.call(OP_PAUSE, Vec::new()).map(drop)
    }

    pub fn unpause(&mut self) -> Result<()> {
        self.call(OP_UNPAUSE, Vec::new()).map(drop)
    }

    /// Snapshot the VM.
    pub fn save(&mut self) -> Result<Vec<u8>> {
        let value = self.call(OP_SAVE, Vec::new())?;
        value_to_bytes(&value)
            .ok_or_else(|| PeerError::Protocol("save did not return a byte array".to_string()))
    }

    pub fn restore(&mut self, state: &[u8]) -> Result<()> {
        self.call(OP_RESTORE, vec![bytes_to_value(state)]).map(drop)
    }

    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.call(OP_SEND_KEYBOARD, vec![Value::from(text)]).map(drop)
    }

    pub fn set_scale(&mut self, x: f64, y: f64) -> Result<()> {
        self.call(OP_SET_SCALE, vec![json!(x), json!(y)]).map(drop)
    }

    pub fn set_fullscreen(&mut self) -> Result<()> {
        self.call(OP_SET_FULLSCREEN, Vec::new()).map(drop)
    }

    pub fn mac(&mut self) -> Result<String> {
        match self.call(OP_MAC, Vec::new())? {
            Value::String(mac) => Ok(mac),
            other => Err(PeerError::Protocol(format!("mac returned {other}"))),
        }
    }

    /// PNG bytes of the screen, `None` when the VM has nothing to show.
    pub fn screenshot(&mut self) -> Result<Option<Vec<u8>>> {
        match self.call(OP_SCREENSHOT, Vec::new())? {
            Value::Null => Ok(None),
            value => value_to_bytes(&value).map(Some).ok_or_else(|| {
                PeerError::Protocol("screenshot did not return a byte array".to_string())
            }),
        }
    }

    fn next_message(&mut self) -> Result<Message> {
        self.source
            .recv()?
            .ok_or_else(|| PeerError::Disconnected("vm closed the control connection".to_string()))
    }

    /// Handle one message; replies are handed back to the caller.
    fn handle(&mut self, message: Message) -> Result<Option<Reply>> {
        match message.channel {
            RPC => {}
            TTY => {
                self.on_tty(&message.payload);
                return Ok(None);
            }
            other => {
                warn!(channel = other, name = channel_name(other), "unexpected channel from vm");
                return Ok(None);
            }
        }

        let rpc = match RpcMessage::decode(&message.payload) {
            Ok(rpc) => rpc,
            Err(err) => {
                warn!(error = %err, size = message.payload.len(), "undecodable message from vm");
                return Ok(None);
            }
        };
        match rpc {
            RpcMessage::Reply { id, result, error } => Ok(Some((id, result, error))),
            RpcMessage::Call { id, op, args } => {
                let reply = self.answer(id, &op, &args);
                self.sink.send(RPC, &reply.encode()?)?;
                Ok(None)
            }
        }
    }

    fn on_tty(&mut self, payload: &[u8]) {
        if let Some(watch) = self.exit_watch.as_mut() {
            if watch.feed(payload) {
                let pattern = String::from_utf8_lossy(watch.pattern());
                info!(pattern = %pattern, "exit pattern seen on console");
            }
        }

        self.tty_output.extend_from_slice(payload);
        if self.tty_output.len() > self.tty_limit {
            let excess = self.tty_output.len() - self.tty_limit;
            if self.tty_dropped == 0 {
                warn!(
                    limit = self.tty_limit,
                    "console output not being read, dropping oldest bytes"
                );
            }
            self.tty_output.drain(..excess);
            self.tty_dropped += excess as u64;
        }
    }

    fn answer(&mut self, id: u64, op: &str, args: &[Value]) -> RpcMessage {
        match op {
            OP_CONFIG => RpcMessage::ok(id, self.config.clone()),
            OP_LOADED => {
                info!("vm loaded");
                self.loaded = true;
                RpcMessage::ok(id, Value::Null)
            }
            OP_TTY => {
                debug!("vm opened its tty");
                self.tty_open = true;
                RpcMessage::ok(id, Value::Null)
            }
            OP_LOG => {
                let line = args
                    .iter()
                    .map(|arg| match arg {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ");
                info!(target: "env86::vm", "{line}");
                RpcMessage::ok(id, Value::Null)
            }
            other => {
                warn!(op = other, "vm called an unknown host operation");
                RpcMessage::err(id, PeerError::UnknownOperation(other.to_string()).to_string())
            }
        }
    }

    pub fn into_parts(self) -> (S, R) {
        (self.sink, self.source)
    }
}
