//! CRC-16 Encapsulation CC (0x56).
//!
//! Adds an application-level checksum for nodes on networks where the
//! link-layer checksum is considered too weak. The CRC covers the CC id,
//! the command byte, and the inner CC bytes.

use crate::crc16::crc16_aug_ccitt;
use crate::error::CCError;
use crate::validate_payload;

pub const ENCAP: u8 = 0x01;

const CC_ID: u8 = 0x56;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Crc16CC {
    Encap {
        /// The serialized inner CC, checksum already stripped and verified.
        inner: Vec<u8>,
    },
}

impl Crc16CC {
    pub fn command(&self) -> u8 {
        ENCAP
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command {
            ENCAP => {
                validate_payload!(payload.len() >= 4, "crc16 encap needs inner cc and checksum");
                let (inner, crc_bytes) = payload.split_at(payload.len() - 2);
                let expected = u16::from_be_bytes([crc_bytes[0], crc_bytes[1]]);

                let mut covered = vec![CC_ID, ENCAP];
                covered.extend_from_slice(inner);
                validate_payload!(
                    crc16_aug_ccitt(&covered) == expected,
                    "crc16 encap checksum mismatch"
                );

                Ok(Crc16CC::Encap {
                    inner: inner.to_vec(),
                })
            }
            other => Err(CCError::UnknownCommand {
                cc: CC_ID,
                command: other,
            }),
        }
    }

    pub fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            Crc16CC::Encap { inner } => {
                let mut covered = vec![CC_ID, ENCAP];
                covered.extend_from_slice(inner);
                let crc = crc16_aug_ccitt(&covered);
                out.extend_from_slice(inner);
                out.extend_from_slice(&crc.to_be_bytes());
            }
        }
    }
}
