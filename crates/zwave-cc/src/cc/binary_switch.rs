//! Binary Switch CC (0x25).

use crate::error::CCError;
use crate::types::{parse_maybe_bool_level, Duration};
use crate::validate_payload;

pub const SET: u8 = 0x01;
pub const GET: u8 = 0x02;
pub const REPORT: u8 = 0x03;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinarySwitchCC {
    Set {
        target_value: bool,
        /// v2 transition duration; omitted on the wire when `None`.
        duration: Option<Duration>,
    },
    Get,
    Report {
        /// `None` when the device reports 0xFE ("unknown").
        current_value: Option<bool>,
        target_value: Option<bool>,
        duration: Option<Duration>,
    },
}

impl BinarySwitchCC {
    /// A plain v1 set.
    pub fn set(target_value: bool) -> Self {
        BinarySwitchCC::Set {
            target_value,
            duration: None,
        }
    }

    pub fn command(&self) -> u8 {
        match self {
            BinarySwitchCC::Set { .. } => SET,
            BinarySwitchCC::Get => GET,
            BinarySwitchCC::Report { .. } => REPORT,
        }
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command {
            SET => {
                validate_payload!(
                    matches!(payload.len(), 1 | 2),
                    "binary switch set carries one or two bytes"
                );
                Ok(BinarySwitchCC::Set {
                    target_value: payload[0] != 0,
                    duration: payload.get(1).map(|&b| Duration::parse(b)),
                })
            }
            GET => {
                validate_payload!(payload.is_empty(), "binary switch get carries no payload");
                Ok(BinarySwitchCC::Get)
            }
            REPORT => {
                validate_payload!(!payload.is_empty(), "binary switch report needs a value");
                let (target_value, duration) = if payload.len() >= 3 {
                    (
                        parse_maybe_bool_level(payload[1]),
                        Some(Duration::parse(payload[2])),
                    )
                } else {
                    (None, None)
                };
                Ok(BinarySwitchCC::Report {
                    current_value: parse_maybe_bool_level(payload[0]),
                    target_value,
                    duration,
                })
            }
            other => Err(CCError::UnknownCommand {
                cc: 0x25,
                command: other,
            }),
        }
    }

    pub fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            BinarySwitchCC::Set {
                target_value,
                duration,
            } => {
                out.push(if *target_value { 0xFF } else { 0x00 });
                if let Some(dur) = duration {
                    out.push(dur.as_u8());
                }
            }
            BinarySwitchCC::Get => {}
            BinarySwitchCC::Report {
                current_value,
                target_value,
                duration,
            } => {
                out.push(match current_value {
                    Some(true) => 0xFF,
                    Some(false) => 0x00,
                    None => 0xFE,
                });
                if let (Some(target), Some(dur)) = (target_value, duration) {
                    out.push(if *target { 0xFF } else { 0x00 });
                    out.push(dur.as_u8());
                }
            }
        }
    }
}
