use crate::error::{PeerError, Result};
use crate::machine::Machine;

/// A machine that records what it was asked to do.
#[derive(Debug, Default)]
pub(crate) struct RecordingMachine {
    pub calls: Vec<String>,
    pub serial_in: Vec<(u8, Vec<u8>)>,
    pub state: Vec<u8>,
    pub screenshot: Option<Vec<u8>>,
    pub fail_stop: bool,
}

impl RecordingMachine {
    pub fn serial_bytes(&self, port: u8) -> Vec<u8> {
        self.serial_in
            .iter()
            .filter(|(p, _)| *p == port)
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect()
    }
}

impl Machine for RecordingMachine {
    fn stop(&mut self) -> Result<()> {
        if self.fail_stop {
            return Err(PeerError::Machine("cpu is wedged".to_string()));
        }
        self.calls.push("stop".to_string());
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        self.calls.push("run".to_string());
        Ok(())
    }

    fn save_state(&mut self) -> Result<Vec<u8>> {
        self.calls.push("save_state".to_string());
        Ok(self.state.clone())
    }

    fn restore_state(&mut self, state: &[u8]) -> Result<()> {
        self.calls.push("restore_state".to_string());
        self.state = state.to_vec();
        Ok(())
    }

    fn send_keyboard_text(&mut self, text: &str) -> Result<()> {
        self.calls.push(format!("keyboard {text}"));
        Ok(())
    }

    fn set_scale(&mut self, x: f64, y: f64) -> Result<()> {
        self.calls.push(format!("scale {x} {y}"));
        Ok(())
    }

    fn go_fullscreen(&mut self) -> Result<()> {
        self.calls.push("fullscreen".to_string());
        Ok(())
    }

    fn network_mac(&self) -> Result<[u8; 6]> {
        Ok([0x52, 0x54, 0x00, 0x12, 0x34, 0x0a])
    }

    fn capture_screenshot(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.screenshot.clone())
    }

    fn send_serial_bytes(&mut self, port: u8, bytes: &[u8]) -> Result<()> {
        self.serial_in.push((port, bytes.to_vec()));
        Ok(())
    }
}
