//! RPC messages carried on the control channel.
//!
//! Every envelope on channel [`env86_frame::RPC`] holds one JSON-encoded
//! [`RpcMessage`]. Byte blobs (state snapshots, screenshots) travel as JSON
//! arrays of numbers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PeerError, Result};

/// Pause the machine.
pub const OP_PAUSE: &str = "pause";
/// Resume the machine.
pub const OP_UNPAUSE: &str = "unpause";
/// Snapshot the machine; returns the state blob.
pub const OP_SAVE: &str = "save";
/// Restore a state blob.
pub const OP_RESTORE: &str = "restore";
/// Type text on the keyboard.
pub const OP_SEND_KEYBOARD: &str = "sendKeyboard";
/// Older name for [`OP_SEND_KEYBOARD`].
pub const OP_SEND_TEXT: &str = "sendText";
pub const OP_SET_SCALE: &str = "setScale";
pub const OP_SET_FULLSCREEN: &str = "setFullscreen";
/// Network card MAC as `aa:bb:cc:dd:ee:ff`.
pub const OP_MAC: &str = "mac";
/// Screen capture as PNG bytes, or `null`.
pub const OP_SCREENSHOT: &str = "screenshot";

/// VM → host: boot configuration overrides.
pub const OP_CONFIG: &str = "config";
/// VM → host: the emulator finished loading.
pub const OP_LOADED: &str = "loaded";
/// VM → host: the tty stream is about to start.
pub const OP_TTY: &str = "tty";
/// VM → host: a log line.
pub const OP_LOG: &str = "log";

/// One control-channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RpcMessage {
    Call {
        id: u64,
        op: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Value>,
    },
    Reply {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl RpcMessage {
    pub fn call(id: u64, op: &str, args: Vec<Value>) -> Self {
        Self::Call {
            id,
            op: op.to_string(),
            args,
        }
    }

    /// Successful reply. A `null` result is sent as no result at all.
    pub fn ok(id: u64, result: Value) -> Self {
        Self::Reply {
            id,
            result: (!result.is_null()).then_some(result),
            error: None,
        }
    }

    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self::Reply {
            id,
            result: None,
            error: Some(message.into()),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(PeerError::from)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(PeerError::from)
    }
}

/// Hands out call ids for one direction of a connection.
#[derive(Debug, Clone)]
pub struct CallIds {
    next: u64,
}

impl Default for CallIds {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl CallIds {
    pub fn next_id(&mut self) -> u64 {
        let id = self.next;
        self.next = self.next.wrapping_add(1).max(1);
        id
    }
}

/// Encode a byte blob as a JSON array.
pub fn bytes_to_value(bytes: &[u8]) -> Value {
    Value::Array(bytes.iter().map(|b| Value::from(*b)).collect())
}

/// Decode a JSON array of byte values. `None` if any element is not a byte.
pub fn value_to_bytes(value: &Value) -> Option<Vec<u8>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_u64().and_then(|n| u8::try_from(n).ok()))
        .collect()
}

/// Turn a reply into the call's outcome.
pub fn reply_outcome(result: Option<Value>, error: Option<String>) -> Result<Value> {
    match error {
        Some(message) => Err(PeerError::Remote(message)),
        None => Ok(result.unwrap_or(Value::Null)),
    }
}
