//! Envelope channel ids.
//!
//! Channels below 256 are reserved for env86 itself.

/// Control-channel RPC calls and replies.
pub const RPC: u16 = 1;

/// Raw tty byte stream forwarded to and from serial port 0.
pub const TTY: u16 = 2;

/// Guest-service frames, one frame per envelope.
pub const GUEST: u16 = 3;

/// First channel id free for embedders.
pub const USER_CHANNEL_START: u16 = 256;

/// Human-readable channel name for logs and CLI output.
pub fn channel_name(id: u16) -> &'static str {
    match id {
        RPC => "RPC",
        TTY => "TTY",
        GUEST => "GUEST",
        0..=255 => "RESERVED",
        _ => "USER",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(channel_name(RPC), "RPC");
        assert_eq!(channel_name(GUEST), "GUEST");
        assert_eq!(channel_name(0), "RESERVED");
        assert_eq!(channel_name(USER_CHANNEL_START), "USER");
    }
}
