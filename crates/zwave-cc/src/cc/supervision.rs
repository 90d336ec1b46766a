//! Supervision CC (0x6C): explicit success/fail feedback for application
//! commands.

use crate::error::CCError;
use crate::types::Duration;
use crate::validate_payload;

pub const GET: u8 = 0x01;
pub const REPORT: u8 = 0x02;

const CC_ID: u8 = 0x6C;

/// Session ids are a 6-bit wrapping counter.
pub const SESSION_ID_MASK: u8 = 0x3F;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionStatus {
    NoSupport,
    Working,
    Fail,
    Success,
    Other(u8),
}

impl SupervisionStatus {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x00 => SupervisionStatus::NoSupport,
            0x01 => SupervisionStatus::Working,
            0x02 => SupervisionStatus::Fail,
            0xFF => SupervisionStatus::Success,
            other => SupervisionStatus::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SupervisionStatus::NoSupport => 0x00,
            SupervisionStatus::Working => 0x01,
            SupervisionStatus::Fail => 0x02,
            SupervisionStatus::Success => 0xFF,
            SupervisionStatus::Other(v) => v,
        }
    }

    /// Whether this status ends the supervision session.
    pub fn is_final(self) -> bool {
        !matches!(self, SupervisionStatus::Working)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SupervisionCC {
    Get {
        session_id: u8,
        /// Ask the node to send interim Working reports.
        status_updates: bool,
        /// The serialized inner CC.
        inner: Vec<u8>,
    },
    Report {
        session_id: u8,
        more_updates: bool,
        status: SupervisionStatus,
        duration: Duration,
    },
}

impl SupervisionCC {
    pub fn command(&self) -> u8 {
        match self {
            SupervisionCC::Get { .. } => GET,
            SupervisionCC::Report { .. } => REPORT,
        }
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command {
            GET => {
                validate_payload!(payload.len() >= 3, "supervision get needs header and a cc");
                let len = payload[1] as usize;
                validate_payload!(
                    payload.len() == 2 + len,
                    "supervision get length field mismatch"
                );
                Ok(SupervisionCC::Get {
                    session_id: payload[0] & SESSION_ID_MASK,
                    status_updates: payload[0] & 0x80 != 0,
                    inner: payload[2..].to_vec(),
                })
            }
            REPORT => {
                validate_payload!(payload.len() >= 3, "supervision report carries three bytes");
                Ok(SupervisionCC::Report {
                    session_id: payload[0] & SESSION_ID_MASK,
                    more_updates: payload[0] & 0x80 != 0,
                    status: SupervisionStatus::from_u8(payload[1]),
                    duration: Duration::parse(payload[2]),
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
            SupervisionCC::Get {
                session_id,
                status_updates,
                inner,
            } => {
                let mut head = session_id & SESSION_ID_MASK;
                if *status_updates {
                    head |= 0x80;
                }
                out.push(head);
                out.push(inner.len() as u8);
                out.extend_from_slice(inner);
            }
            SupervisionCC::Report {
                session_id,
                more_updates,
                status,
                duration,
            } => {
                let mut head = session_id & SESSION_ID_MASK;
                if *more_updates {
                    head |= 0x80;
                }
                out.push(head);
                out.push(status.as_u8());
                out.push(duration.as_u8());
            }
        }
    }
}
