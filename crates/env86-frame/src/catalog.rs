//! Guest-service message types and their frame-length rules.
//!
//! Byte 0 of every frame is the message type. All types have a fixed total
//! size except [`MessageType::Data`], whose size is `9 + length` with
//! `length` a big-endian `u32` at offset 5.
//!
//! | Type id | Name          | Total size  |
//! |---------|---------------|-------------|
//! | 100     | open          | 13          |
//! | 101     | open-confirm  | 17          |
//! | 102     | open-failure  | 5           |
//! | 103     | window-adjust | 9           |
//! | 104     | data          | 9 + length  |
//! | 105     | eof           | 5           |
//! | 106     | close         | 5           |

/// Size of the data frame header; the payload starts right after it.
pub const DATA_HEADER_SIZE: usize = 9;

/// Offset of the big-endian payload length inside a data frame.
pub const DATA_LENGTH_OFFSET: usize = 5;

/// Guest-service message type, carried in byte 0 of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Open = 100,
    OpenConfirm = 101,
    OpenFailure = 102,
    WindowAdjust = 103,
    Data = 104,
    Eof = 105,
    Close = 106,
}

impl MessageType {
    /// Every known type, in id order.
    pub const ALL: [MessageType; 7] = [
        MessageType::Open,
        MessageType::OpenConfirm,
        MessageType::OpenFailure,
        MessageType::WindowAdjust,
        MessageType::Data,
        MessageType::Eof,
        MessageType::Close,
    ];

    /// Look up a type byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            100 => Some(Self::Open),
            101 => Some(Self::OpenConfirm),
            102 => Some(Self::OpenFailure),
            103 => Some(Self::WindowAdjust),
            104 => Some(Self::Data),
            105 => Some(Self::Eof),
            106 => Some(Self::Close),
            _ => None,
        }
    }

    /// The wire id.
    pub fn id(self) -> u8 {
        self as u8
    }

    /// Wire name, as used in logs and CLI output.
    pub fn name(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::OpenConfirm => "open-confirm",
            Self::OpenFailure => "open-failure",
            Self::WindowAdjust => "window-adjust",
            Self::Data => "data",
            Self::Eof => "eof",
            Self::Close => "close",
        }
    }

    /// Total frame size for fixed-size types, `None` for data.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Open => Some(13),
            Self::OpenConfirm => Some(17),
            Self::OpenFailure => Some(5),
            Self::WindowAdjust => Some(9),
            Self::Data => None,
            Self::Eof => Some(5),
            Self::Close => Some(5),
        }
    }
}

/// What the catalog knows about the frame currently being buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSize {
    /// The frame is exactly this many bytes long.
    Known(usize),
    /// A data frame whose length field has not fully arrived yet.
    AwaitingLength,
    /// The type byte is not a guest-service message type.
    Unknown,
}

/// Determine the target size of a frame from its type byte and the bytes
/// buffered so far (type byte included).
///
/// Pure and non-blocking; only ever looks at bytes already in `buffered`.
pub fn size_for(type_byte: u8, buffered: &[u8]) -> FrameSize {
    let Some(message_type) = MessageType::from_byte(type_byte) else {
        return FrameSize::Unknown;
    };
    if let Some(size) = message_type.fixed_size() {
        return FrameSize::Known(size);
    }
    if buffered.len() < DATA_HEADER_SIZE {
        return FrameSize::AwaitingLength;
    }

    let field = [
        buffered[DATA_LENGTH_OFFSET],
        buffered[DATA_LENGTH_OFFSET + 1],
        buffered[DATA_LENGTH_OFFSET + 2],
        buffered[DATA_LENGTH_OFFSET + 3],
    ];
    let length = u32::from_be_bytes(field) as usize;
    match DATA_HEADER_SIZE.checked_add(length) {
        Some(total) => FrameSize::Known(total),
        None => FrameSize::Unknown,
    }
}
