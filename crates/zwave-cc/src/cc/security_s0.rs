//! Security S0 CC (0x98) wire format.
//!
//! The nonce exchange and the actual encryption live in
//! [`crate::security::s0`]; this module only frames the bytes.

use crate::error::CCError;
use crate::validate_payload;

pub const COMMANDS_SUPPORTED_GET: u8 = 0x02;
pub const COMMANDS_SUPPORTED_REPORT: u8 = 0x03;
pub const NONCE_GET: u8 = 0x40;
pub const NONCE_REPORT: u8 = 0x80;
pub const COMMAND_ENCAP: u8 = 0x81;

const CC_ID: u8 = 0x98;

/// Marker separating supported from controlled CCs in the report.
const SUPPORT_CONTROL_MARK: u8 = 0xEF;

/// The encrypted body of a CommandEncap frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S0Encap {
    /// Sender nonce, transmitted in the clear as the IV half.
    pub sender_nonce: [u8; 8],
    /// CBC ciphertext (block-aligned).
    pub ciphertext: Vec<u8>,
    /// First byte of the receiver nonce this frame was encrypted against.
    pub nonce_id: u8,
    /// Truncated CMAC.
    pub mac: [u8; 8],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityS0CC {
    CommandsSupportedGet,
    CommandsSupportedReport {
        reports_to_follow: u8,
        supported_ccs: Vec<u8>,
    },
    NonceGet,
    NonceReport {
        nonce: [u8; 8],
    },
    CommandEncap(S0Encap),
}

impl SecurityS0CC {
    pub fn command(&self) -> u8 {
        match self {
            SecurityS0CC::CommandsSupportedGet => COMMANDS_SUPPORTED_GET,
            SecurityS0CC::CommandsSupportedReport { .. } => COMMANDS_SUPPORTED_REPORT,
            SecurityS0CC::NonceGet => NONCE_GET,
            SecurityS0CC::NonceReport { .. } => NONCE_REPORT,
            SecurityS0CC::CommandEncap(_) => COMMAND_ENCAP,
        }
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command {
            COMMANDS_SUPPORTED_GET => {
                validate_payload!(payload.is_empty(), "commands supported get carries no payload");
                Ok(SecurityS0CC::CommandsSupportedGet)
            }
            COMMANDS_SUPPORTED_REPORT => {
                validate_payload!(!payload.is_empty(), "commands supported report too short");
                let ccs = &payload[1..];
                let supported = match ccs.iter().position(|&b| b == SUPPORT_CONTROL_MARK) {
                    Some(mark) => &ccs[..mark],
                    None => ccs,
                };
                Ok(SecurityS0CC::CommandsSupportedReport {
                    reports_to_follow: payload[0],
                    supported_ccs: supported.to_vec(),
                })
            }
            NONCE_GET => {
                validate_payload!(payload.is_empty(), "nonce get carries no payload");
                Ok(SecurityS0CC::NonceGet)
            }
            NONCE_REPORT => {
                validate_payload!(payload.len() == 8, "nonce report carries eight bytes");
                let nonce: [u8; 8] = payload.try_into().expect("length checked above");
                Ok(SecurityS0CC::NonceReport { nonce })
            }
            COMMAND_ENCAP => {
                // sender nonce(8) + at least one cipher block(16) + nonce id(1) + mac(8)
                validate_payload!(payload.len() >= 33, "command encap too short");
                let cipher_len = payload.len() - 17;
                validate_payload!(
                    cipher_len % 16 == 0,
                    "command encap ciphertext not block-aligned"
                );
                let sender_nonce: [u8; 8] =
                    payload[..8].try_into().expect("length checked above");
                let mac: [u8; 8] = payload[payload.len() - 8..]
                    .try_into()
                    .expect("length checked above");
                Ok(SecurityS0CC::CommandEncap(S0Encap {
                    sender_nonce,
                    ciphertext: payload[8..8 + cipher_len].to_vec(),
                    nonce_id: payload[8 + cipher_len],
                    mac,
                }))
            }
            other => Err(CCError::UnknownCommand {
                cc: CC_ID,
                command: other,
            }),
        }
    }

    pub fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            SecurityS0CC::CommandsSupportedGet | SecurityS0CC::NonceGet => {}
            SecurityS0CC::CommandsSupportedReport {
                reports_to_follow,
                supported_ccs,
            } => {
                out.push(*reports_to_follow);
                out.extend_from_slice(supported_ccs);
            }
            SecurityS0CC::NonceReport { nonce } => out.extend_from_slice(nonce),
            SecurityS0CC::CommandEncap(encap) => {
                out.extend_from_slice(&encap.sender_nonce);
                out.extend_from_slice(&encap.ciphertext);
                out.push(encap.nonce_id);
                out.extend_from_slice(&encap.mac);
            }
        }
    }
}
