//! Error types for the zwave-serial crate.

use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// First byte of a serialized data frame was not SOF.
    InvalidSof(u8),
    /// Frame shorter than the minimum data frame.
    TooShort { min: usize, actual: usize },
    /// Length byte disagrees with the number of bytes present.
    LengthMismatch { declared: usize, actual: usize },
    /// Trailing checksum did not match the computed one.
    ChecksumMismatch { expected: u8, actual: u8 },
    /// Payload exceeds the single-byte length field.
    PayloadTooLong(usize),
    /// Type byte was neither Request nor Response.
    InvalidMessageType(u8),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::InvalidSof(v) => write!(f, "invalid start of frame: 0x{v:02x}"),
            FrameError::TooShort { min, actual } => {
                write!(f, "frame too short: need at least {min} bytes, got {actual}")
            }
            FrameError::LengthMismatch { declared, actual } => {
                write!(f, "frame length mismatch: declared {declared}, got {actual}")
            }
            FrameError::ChecksumMismatch { expected, actual } => {
                write!(f, "checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")
            }
            FrameError::PayloadTooLong(len) => write!(f, "payload too long: {len} bytes"),
            FrameError::InvalidMessageType(v) => write!(f, "invalid message type: 0x{v:02x}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    /// No codec entry is registered for the function.
    UnknownFunction(u8),
    /// Payload ended before a required field.
    PayloadTooShort { min: usize, actual: usize },
    /// A field held a value the codec cannot represent.
    MalformedPayload(&'static str),
}

impl fmt::Display for MessageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageError::UnknownFunction(v) => write!(f, "unknown function: 0x{v:02x}"),
            MessageError::PayloadTooShort { min, actual } => {
                write!(f, "payload too short: need at least {min} bytes, got {actual}")
            }
            MessageError::MalformedPayload(what) => write!(f, "malformed payload: {what}"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MessageError {}
