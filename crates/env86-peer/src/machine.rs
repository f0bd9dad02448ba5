use crate::error::Result;

/// Serial port wired to the tty stream.
pub const TTY_PORT: u8 = 0;

/// What a running emulator exposes to the control surface.
///
/// Implementations wrap the actual CPU/device emulator. All calls happen on
/// the session thread.
pub trait Machine {
    /// Pause execution.
    fn stop(&mut self) -> Result<()>;

    /// Resume execution.
    fn run(&mut self) -> Result<()>;

    /// Snapshot the whole machine.
    fn save_state(&mut self) -> Result<Vec<u8>>;

    /// Replace the machine with a snapshot taken by [`Machine::save_state`].
    fn restore_state(&mut self, state: &[u8]) -> Result<()>;

    /// Type `text` on the emulated keyboard.
    fn send_keyboard_text(&mut self, text: &str) -> Result<()>;

    fn set_scale(&mut self, x: f64, y: f64) -> Result<()>;

    fn go_fullscreen(&mut self) -> Result<()>;

    /// MAC address of the emulated network card.
    fn network_mac(&self) -> Result<[u8; 6]>;

    /// PNG of the current screen, `None` when there is nothing to capture.
    fn capture_screenshot(&mut self) -> Result<Option<Vec<u8>>>;

    /// Inject bytes into the input side of a serial port.
    fn send_serial_bytes(&mut self, port: u8, bytes: &[u8]) -> Result<()>;
}

impl<M: Machine + ?Sized> Machine for Box<M> {
    fn stop(&mut self) -> Result<()> {
        (**self).stop()
    }

    fn run(&mut self) -> Result<()> {
        (**self).run()
    }

    fn save_state(&mut self) -> Result<Vec<u8>> {
        (**self).save_state()
    }

    fn restore_state(&mut self, state: &[u8]) -> Result<()> {
        (**self).restore_state(state)
    }

    fn send_keyboard_text(&mut self, text: &str) -> Result<()> {
        (**self).send_keyboard_text(text)
    }

    fn set_scale(&mut self, x: f64, y: f64) -> Result<()> {
        (**self).set_scale(x, y)
    }

    fn go_fullscreen(&mut self) -> Result<()> {
        (**self).go_fullscreen()
    }

    fn network_mac(&self) -> Result<[u8; 6]> {
        (**self).network_mac()
    }

    fn capture_screenshot(&mut self) -> Result<Option<Vec<u8>>> {
        (**self).capture_screenshot()
    }

    fn send_serial_bytes(&mut self, port: u8, bytes: &[u8]) -> Result<()> {
        (**self).send_serial_bytes(port, bytes)
    }
}

/// Things the emulator reports back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmEvent {
    /// The emulator finished loading. Fires once per session.
    Loaded,
    /// One byte appeared on the output side of a serial port.
    SerialByte { port: u8, byte: u8 },
}

/// Format a MAC as lower-case two-digit hex joined by `:`.
pub fn format_mac(mac: &[u8]) -> String {
    mac.iter()
        .map(|octet| format!("{octet:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
