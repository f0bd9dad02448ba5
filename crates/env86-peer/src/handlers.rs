use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{PeerError, Result};
use crate::machine::{format_mac, Machine};
use crate::rpc::{
    bytes_to_value, value_to_bytes, OP_MAC, OP_PAUSE, OP_RESTORE, OP_SAVE, OP_SCREENSHOT,
    OP_SEND_KEYBOARD, OP_SEND_TEXT, OP_SET_FULLSCREEN, OP_SET_SCALE, OP_UNPAUSE,
};

/// A remote-callable operation bound to a machine.
pub type Handler<M> = fn(&mut M, &[Value]) -> Result<Value>;

/// Operation name → handler.
///
/// Built once when the control connection is set up; lookups only after that.
pub struct HandlerTable<M> {
    handlers: BTreeMap<&'static str, Handler<M>>,
}

impl<M: Machine> HandlerTable<M> {
    /// The full set of VM operations a controller can call.
    pub fn standard() -> Self {
        Self::empty()
            .with(OP_PAUSE, pause)
            .with(OP_UNPAUSE, unpause)
            .with(OP_SAVE, save)
            .with(OP_RESTORE, restore)
            .with(OP_SEND_KEYBOARD, send_keyboard)
            .with(OP_SEND_TEXT, send_keyboard)
            .with(OP_SET_SCALE, set_scale)
            .with(OP_SET_FULLSCREEN, set_fullscreen)
            .with(OP_MAC, mac)
            .with(OP_SCREENSHOT, screenshot)
    }

    pub fn empty() -> Self {
        Self {
            handlers: BTreeMap::new(),
        }
    }

    /// Register `handler` under `op`, replacing any previous one.
    pub fn with(mut self, op: &'static str, handler: Handler<M>) -> Self {
        self.handlers.insert(op, handler);
        self
    }

    pub fn contains(&self, op: &str) -> bool {
        self.handlers.contains_key(op)
    }

    /// Registered operation names, sorted.
    pub fn operations(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.handlers.keys().copied()
    }

    /// Run `op` against `machine`.
    pub fn dispatch(&self, machine: &mut M, op: &str, args: &[Value]) -> Result<Value> {
        let handler = self
            .handlers
            .get(op)
            .ok_or_else(|| PeerError::UnknownOperation(op.to_string()))?;
        handler(machine, args)
    }
}

fn pause<M: Machine>(machine: &mut M, _args: &[Value]) -> Result<Value> {
    machine.stop()?;
    Ok(Value::Null)
}

fn unpause<M: Machine>(machine: &mut M, _args: &[Value]) -> Result<Value> {
    machine.run()?;
    Ok(Value::Null)
}

fn save<M: Machine>(machine: &mut M, _args: &[Value]) -> Result<Value> {
    Ok(bytes_to_value(&machine.save_state()?))
}

fn restore<M: Machine>(machine: &mut M, args: &[Value]) -> Result<Value> {
    let state = value_to_bytes(arg(OP_RESTORE, args, 0)?)
        .ok_or_else(|| bad_args(OP_RESTORE, "expected a byte array"))?;
    machine.restore_state(&state)?;
    Ok(Value::Null)
}

fn send_keyboard<M: Machine>(machine: &mut M, args: &[Value]) -> Result<Value> {
    let text = arg(OP_SEND_KEYBOARD, args, 0)?
        .as_str()
        .ok_or_else(|| bad_args(OP_SEND_KEYBOARD, "expected a string"))?;
    machine.send_keyboard_text(text)?;
    Ok(Value::Null)
}

fn set_scale<M: Machine>(machine: &mut M, args: &[Value]) -> Result<Value> {
    let number = |index| {
        arg(OP_SET_SCALE, args, index)?
            .as_f64()
            .ok_or_else(|| bad_args(OP_SET_SCALE, "expected two numbers"))
    };
    machine.set_scale(number(0)?, number(1)?)?;
    Ok(Value::Null)
}

fn set_fullscreen<M: Machine>(machine: &mut M, _args: &[Value]) -> Result<Value> {
    machine.go_fullscreen()?;
    Ok(Value::Null)
}

fn mac<M: Machine>(machine: &mut M, _args: &[Value]) -> Result<Value> {
    Ok(Value::String(format_mac(&machine.network_mac()?)))
}

fn screenshot<M: Machine>(machine: &mut M, _args: &[Value]) -> Result<Value> {
    Ok(machine
        .capture_screenshot()?
        .map_or(Value::Null, |png| bytes_to_value(&png)))
}

fn arg<'a>(op: &str, args: &'a [Value], index: usize) -> Result<&'a Value> {
    args.get(index)
        .ok_or_else(|| bad_args(op, &format!("missing argument {}", index + 1)))
}

fn bad_args(op: &str, message: &str) -> PeerError {
    PeerError::BadArguments {
        op: op.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::RecordingMachine;

    fn table() -> HandlerTable<RecordingMachine> {
        HandlerTable::standard()
    }

    #[test]
    fn standard_table_covers_every_operation() {
        let ops: Vec<_> = table().operations().collect();
        assert_eq!(
            ops,
            vec![
                "mac",
                "pause",
                "restore",
                "save",
                "screenshot",
                "sendKeyboard",
                "sendText",
                "setFullscreen",
                "setScale",
                "unpause",
            ]
        );
    }

    #[test]
    fn lifecycle_ops_reach_the_machine() {
        let mut machine = RecordingMachine::default();
        let table = table();
        assert_eq!(table.dispatch(&mut machine, "pause", &[]).unwrap(), Value::Null);
        table.dispatch(&mut machine, "unpause", &[]).unwrap();
        table.dispatch(&mut machine, "setFullscreen", &[]).unwrap();
        assert_eq!(machine.calls, vec!["stop", "run", "fullscreen"]);
    }

    #[test]
    fn save_and_restore_carry_bytes() {
        let mut machine = RecordingMachine {
            state: vec![1, 2, 3],
            ..RecordingMachine::default()
        };
        let table = table();

        let saved = table.dispatch(&mut machine, "save", &[]).unwrap();
        assert_eq!(saved, json!([1, 2, 3]));

        table
            .dispatch(&mut machine, "restore", &[json!([9, 8])])
            .unwrap();
        assert_eq!(machine.state, vec![9, 8]);
    }

    #[test]
    fn keyboard_under_both_names() {
        let mut machine = RecordingMachine::default();
        let table = table();
        table
            .dispatch(&mut machine, "sendKeyboard", &[json!("ls\n")])
            .unwrap();
        table.dispatch(&mut machine, "sendText", &[json!("pwd")]).unwrap();
        assert_eq!(machine.calls, vec!["keyboard ls\n", "keyboard pwd"]);
    }

    #[test]
    fn set_scale_takes_two_numbers() {
        let mut machine = RecordingMachine::default();
        let table = table();
        table
            .dispatch(&mut machine, "setScale", &[json!(2), json!(0.5)])
            .unwrap();
        assert_eq!(machine.calls, vec!["scale 2 0.5"]);

        let err = table
            .dispatch(&mut machine, "setScale", &[json!(2)])
            .unwrap_err();
        assert!(matches!(err, PeerError::BadArguments { op, .. } if op == "setScale"));
    }

    #[test]
    fn mac_is_formatted() {
        let mut machine = RecordingMachine::default();
        assert_eq!(
            table().dispatch(&mut machine, "mac", &[]).unwrap(),
            json!("52:54:00:12:34:0a")
        );
    }

    #[test]
    fn screenshot_missing_is_null() {
        let mut machine = RecordingMachine::default();
        assert_eq!(
            table().dispatch(&mut machine, "screenshot", &[]).unwrap(),
            Value::Null
        );

        machine.screenshot = Some(vec![0x89, b'P', b'N', b'G']);
        assert_eq!(
            table().dispatch(&mut machine, "screenshot", &[]).unwrap(),
            json!([0x89, 0x50, 0x4e, 0x47])
        );
    }

    #[test]
    fn wrong_argument_types() {
        let mut machine = RecordingMachine::default();
        let table = table();
        assert!(table
            .dispatch(&mut machine, "restore", &[json!("not bytes")])
            .is_err());
        assert!(table.dispatch(&mut machine, "sendKeyboard", &[json!(5)]).is_err());
        assert!(table.dispatch(&mut machine, "sendKeyboard", &[]).is_err());
        assert!(machine.calls.is_empty());
    }

    #[test]
    fn unknown_operation() {
        let mut machine = RecordingMachine::default();
        let table = table();
        assert!(!table.contains("reboot"));
        assert!(matches!(
            table.dispatch(&mut machine, "reboot", &[]),
            Err(PeerError::UnknownOperation(op)) if op == "reboot"
        ));
    }

    #[test]
    fn machine_errors_propagate() {
        let mut machine = RecordingMachine {
            fail_stop: true,
            ..RecordingMachine::default()
        };
        assert!(matches!(
            table().dispatch(&mut machine, "pause", &[]),
            Err(PeerError::Machine(_))
        ));
    }
}
