//! Basic CC (0x20): the lowest-common-denominator set/get/report.

use crate::error::CCError;
use crate::types::{parse_maybe_level, Duration};
use crate::validate_payload;

pub const SET: u8 = 0x01;
pub const GET: u8 = 0x02;
pub const REPORT: u8 = 0x03;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BasicCC {
    Set {
        target_value: u8,
    },
    Get,
    Report {
        /// `None` when the device reports 0xFE ("unknown").
        current_value: Option<u8>,
        /// v2 fields, absent on v1 reports.
        target_value: Option<u8>,
        duration: Option<Duration>,
    },
}

impl BasicCC {
    pub fn command(&self) -> u8 {
        match self {
            BasicCC::Set { .. } => SET,
            BasicCC::Get => GET,
            BasicCC::Report { .. } => REPORT,
        }
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command {
            SET => {
                validate_payload!(payload.len() == 1, "basic set carries one byte");
                Ok(BasicCC::Set {
                    target_value: payload[0],
                })
            }
            GET => {
                validate_payload!(payload.is_empty(), "basic get carries no payload");
                Ok(BasicCC::Get)
            }
            REPORT => {
                validate_payload!(!payload.is_empty(), "basic report needs a current value");
                let (target_value, duration) = if payload.len() >= 3 {
                    (
                        parse_maybe_level(payload[1]),
                        Some(Duration::parse(payload[2])),
                    )
                } else {
                    (None, None)
                };
                Ok(BasicCC::Report {
                    current_value: parse_maybe_level(payload[0]),
                    target_value,
                    duration,
                })
            }
            other => Err(CCError::UnknownCommand {
                cc: 0x20,
                command: other,
            }),
        }
    }

    pub fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            BasicCC::Set { target_value } => out.push(*target_value),
            BasicCC::Get => {}
            BasicCC::Report {
                current_value,
                target_value,
                duration,
            } => {
                out.push(current_value.unwrap_or(0xFE));
                if let (Some(target), Some(dur)) = (target_value, duration) {
                    out.push(*target);
                    out.push(dur.as_u8());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_roundtrip() {
        let cc = BasicCC::parse(SET, &[0x63]).unwrap();
        assert_eq!(cc, BasicCC::Set { target_value: 0x63 });
        let mut out = Vec::new();
        cc.write_payload(&mut out);
        assert_eq!(out, vec![0x63]);
    }

    #[test]
    fn v1_report() {
        let cc = BasicCC::parse(REPORT, &[0xFF]).unwrap();
        assert_eq!(
            cc,
            BasicCC::Report {
                current_value: Some(0xFF),
                target_value: None,
                duration: None,
            }
        );
    }

    #[test]
    fn v2_report_with_unknown_current() {
        let cc = BasicCC::parse(REPORT, &[0xFE, 0x63, 0x05]).unwrap();
        assert_eq!(
            cc,
            BasicCC::Report {
                current_value: None,
                target_value: Some(0x63),
                duration: Some(Duration::Seconds(5)),
            }
        );
    }

    #[test]
    fn get_rejects_payload() {
        assert!(BasicCC::parse(GET, &[0x00]).is_err());
    }

    #[test]
    fn unknown_command() {
        assert!(matches!(
            BasicCC::parse(0x7E, &[]),
            Err(CCError::UnknownCommand { cc: 0x20, command: 0x7E })
        ));
    }
}
