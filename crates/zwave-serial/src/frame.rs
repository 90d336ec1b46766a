//! Link-layer frame codec.
//!
//! A data frame is serialized as
//! `SOF | length | type | function | payload | checksum` where `length`
//! counts everything after itself except nothing: type, function, payload,
//! and the checksum byte. The three control frames are single bytes.

extern crate alloc;
use alloc::vec::Vec;

use crate::checksum::frame_checksum;
use crate::consts::{MessageType, ACK, CAN, MAX_PAYLOAD, NAK, SOF};
use crate::error::FrameError;

/// A link-layer frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ack,
    Nak,
    Can,
    Data(DataFrame),
}

impl Frame {
    /// Serialize the frame to wire bytes.
    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        match self {
            Frame::Ack => Ok(alloc::vec![ACK]),
            Frame::Nak => Ok(alloc::vec![NAK]),
            Frame::Can => Ok(alloc::vec![CAN]),
            Frame::Data(data) => data.serialize(),
        }
    }
}

/// The payload-bearing frame variant.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct DataFrame {
    pub msg_type: MessageType,
    pub function: u8,
    pub payload: Vec<u8>,
}

impl DataFrame {
    pub fn new(msg_type: MessageType, function: u8, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            function,
            payload,
        }
    }

    /// Serialize to `SOF | len | type | function | payload | checksum`.
    pub fn serialize(&self) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(FrameError::PayloadTooLong(self.payload.len()));
        }
        // type + function + payload + checksum
        let length = 3 + self.payload.len();

        let mut out = Vec::with_capacity(length + 2);
        out.push(SOF);
        out.push(length as u8);
        out.push(self.msg_type.as_u8());
        out.push(self.function);
        out.extend_from_slice(&self.payload);
        // Checksum covers everything after the SOF.
        out.push(frame_checksum(&out[1..]));
        Ok(out)
    }

    /// Parse a complete serialized data frame, checksum included.
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        // SOF + len + type + function + checksum
        if raw.len() < 5 {
            return Err(FrameError::TooShort {
                min: 5,
                actual: raw.len(),
            });
        }
        if raw[0] != SOF {
            return Err(FrameError::InvalidSof(raw[0]));
        }
        let declared = raw[1] as usize;
        if raw.len() != declared + 2 {
            return Err(FrameError::LengthMismatch {
                declared: declared + 2,
                actual: raw.len(),
            });
        }

        let expected = frame_checksum(&raw[1..raw.len() - 1]);
        let actual = raw[raw.len() - 1];
        if expected != actual {
            return Err(FrameError::ChecksumMismatch { expected, actual });
        }

        let msg_type = MessageType::from_u8(raw[2])?;
        let function = raw[3];
        let payload = raw[4..raw.len() - 1].to_vec();

        Ok(Self {
            msg_type,
            function,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    extern crate alloc;
    use super::*;
    use alloc::vec;

    #[test]
    fn control_frames_are_single_bytes() {
        assert_eq!(Frame::Ack.serialize().unwrap(), vec![0x06]);
        assert_eq!(Frame::Nak.serialize().unwrap(), vec![0x15]);
        assert_eq!(Frame::Can.serialize().unwrap(), vec![0x18]);
    }

    #[test]
    fn serialize_get_controller_version() {
        let frame = DataFrame::new(MessageType::Request, 0x15, vec![]);
        assert_eq!(frame.serialize().unwrap(), vec![0x01, 0x03, 0x00, 0x15, 0xE9]);
    }

    #[test]
    fn serialize_with_payload() {
        let frame = DataFrame::new(MessageType::Request, 0x13, vec![0x05, 0x02, 0x25, 0x02]);
        let raw = frame.serialize().unwrap();
        assert_eq!(raw[0], SOF);
        assert_eq!(raw[1] as usize, raw.len() - 2);
        assert_eq!(frame_checksum(&raw[1..raw.len() - 1]), raw[raw.len() - 1]);
    }

    #[test]
    fn parse_rejects_bad_sof() {
        let err = DataFrame::parse(&[0x02, 0x03, 0x00, 0x15, 0xE9]).unwrap_err();
        assert_eq!(err, FrameError::InvalidSof(0x02));
    }

    #[test]
    fn parse_rejects_bad_checksum() {
        let err = DataFrame::parse(&[0x01, 0x03, 0x00, 0x15, 0xE8]).unwrap_err();
        assert!(matches!(err, FrameError::ChecksumMismatch { .. }));
    }

    #[test]
    fn parse_rejects_length_mismatch() {
        let err = DataFrame::parse(&[0x01, 0x05, 0x00, 0x15, 0xE9]).unwrap_err();
        assert!(matches!(err, FrameError::LengthMismatch { .. }));
    }

    #[test]
    fn parse_rejects_short_input() {
        assert!(DataFrame::parse(&[]).is_err());
        assert!(DataFrame::parse(&[0x01, 0x03, 0x00]).is_err());
    }

    #[test]
    fn payload_too_long_rejected() {
        let frame = DataFrame::new(MessageType::Request, 0x13, vec![0u8; 253]);
        assert!(matches!(
            frame.serialize(),
            Err(FrameError::PayloadTooLong(253))
        ));
    }

    #[test]
    fn roundtrip() {
        let frame = DataFrame::new(MessageType::Response, 0x41, vec![0xD3, 0x9C, 0x00, 0x04, 0x10, 0x01]);
        let raw = frame.serialize().unwrap();
        let parsed = DataFrame::parse(&raw).unwrap();
        assert_eq!(parsed, frame);
    }
}
