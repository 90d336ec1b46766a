//! Multilevel Switch CC (0x26).
//!
//! Levels are 0..=99 plus 0xFF ("restore previous"). The supported-report
//! switch type determines the user-facing labels for the up/down value pair;
//! those labels live in value metadata, not here.

use crate::error::CCError;
use crate::types::{parse_maybe_level, Duration};
use crate::validate_payload;

pub const SET: u8 = 0x01;
pub const GET: u8 = 0x02;
pub const REPORT: u8 = 0x03;
pub const START_LEVEL_CHANGE: u8 = 0x04;
pub const STOP_LEVEL_CHANGE: u8 = 0x05;
pub const SUPPORTED_GET: u8 = 0x06;
pub const SUPPORTED_REPORT: u8 = 0x07;

/// The physical kind of switch, reported by SupportedReport. Determines
/// metadata labels such as "Up"/"Down" vs "Open"/"Close".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchType {
    NotSupported,
    OffOn,
    DownUp,
    CloseOpen,
    CounterClockwiseClockwise,
    LeftRight,
    ReverseForward,
    PullPush,
    Other(u8),
}

impl SwitchType {
    pub fn from_u8(v: u8) -> Self {
        match v & 0x1F {
            0x00 => SwitchType::NotSupported,
            0x01 => SwitchType::OffOn,
            0x02 => SwitchType::DownUp,
            0x03 => SwitchType::CloseOpen,
            0x04 => SwitchType::CounterClockwiseClockwise,
            0x05 => SwitchType::LeftRight,
            0x06 => SwitchType::ReverseForward,
            0x07 => SwitchType::PullPush,
            other => SwitchType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            SwitchType::NotSupported => 0x00,
            SwitchType::OffOn => 0x01,
            SwitchType::DownUp => 0x02,
            SwitchType::CloseOpen => 0x03,
            SwitchType::CounterClockwiseClockwise => 0x04,
            SwitchType::LeftRight => 0x05,
            SwitchType::ReverseForward => 0x06,
            SwitchType::PullPush => 0x07,
            SwitchType::Other(v) => v & 0x1F,
        }
    }

    /// The (down, up) label pair for this switch type.
    pub fn direction_labels(self) -> (&'static str, &'static str) {
        match self {
            SwitchType::OffOn => ("Off", "On"),
            SwitchType::DownUp => ("Down", "Up"),
            SwitchType::CloseOpen => ("Close", "Open"),
            SwitchType::CounterClockwiseClockwise => ("Counter-clockwise", "Clockwise"),
            SwitchType::LeftRight => ("Left", "Right"),
            SwitchType::ReverseForward => ("Reverse", "Forward"),
            SwitchType::PullPush => ("Pull", "Push"),
            _ => ("Down", "Up"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelChangeDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultilevelSwitchCC {
    Set {
        target_value: u8,
        duration: Option<Duration>,
    },
    Get,
    Report {
        current_value: Option<u8>,
        target_value: Option<u8>,
        duration: Option<Duration>,
    },
    StartLevelChange {
        direction: LevelChangeDirection,
        ignore_start_level: bool,
        start_level: u8,
        duration: Option<Duration>,
    },
    StopLevelChange,
    SupportedGet,
    SupportedReport {
        primary: SwitchType,
        secondary: SwitchType,
    },
}

impl MultilevelSwitchCC {
    pub fn set(target_value: u8) -> Self {
        MultilevelSwitchCC::Set {
            target_value,
            duration: None,
        }
    }

    pub fn command(&self) -> u8 {
        match self {
            MultilevelSwitchCC::Set { .. } => SET,
            MultilevelSwitchCC::Get => GET,
            MultilevelSwitchCC::Report { .. } => REPORT,
            MultilevelSwitchCC::StartLevelChange { .. } => START_LEVEL_CHANGE,
            MultilevelSwitchCC::StopLevelChange => STOP_LEVEL_CHANGE,
            MultilevelSwitchCC::SupportedGet => SUPPORTED_GET,
            MultilevelSwitchCC::SupportedReport { .. } => SUPPORTED_REPORT,
        }
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command {
            SET => {
                validate_payload!(
                    matches!(payload.len(), 1 | 2),
                    "multilevel set carries one or two bytes"
                );
                Ok(MultilevelSwitchCC::Set {
                    target_value: payload[0],
                    duration: payload.get(1).map(|&b| Duration::parse(b)),
                })
            }
            GET => {
                validate_payload!(payload.is_empty(), "multilevel get carries no payload");
                Ok(MultilevelSwitchCC::Get)
            }
            REPORT => {
                validate_payload!(!payload.is_empty(), "multilevel report needs a value");
                let (target_value, duration) = if payload.len() >= 3 {
                    (
                        parse_maybe_level(payload[1]),
                        Some(Duration::parse(payload[2])),
                    )
                } else {
                    (None, None)
                };
                Ok(MultilevelSwitchCC::Report {
                    current_value: parse_maybe_level(payload[0]),
                    target_value,
                    duration,
                })
            }
            START_LEVEL_CHANGE => {
                validate_payload!(
                    matches!(payload.len(), 2 | 3),
                    "start level change carries two or three bytes"
                );
                let direction = if payload[0] & 0x40 != 0 {
                    LevelChangeDirection::Down
                } else {
                    LevelChangeDirection::Up
                };
                Ok(MultilevelSwitchCC::StartLevelChange {
                    direction,
                    ignore_start_level: payload[0] & 0x20 != 0,
                    start_level: payload[1],
                    duration: payload.get(2).map(|&b| Duration::parse(b)),
                })
            }
            STOP_LEVEL_CHANGE => {
                validate_payload!(payload.is_empty(), "stop level change carries no payload");
                Ok(MultilevelSwitchCC::StopLevelChange)
            }
            SUPPORTED_GET => {
                validate_payload!(payload.is_empty(), "supported get carries no payload");
                Ok(MultilevelSwitchCC::SupportedGet)
            }
            SUPPORTED_REPORT => {
                validate_payload!(payload.len() >= 2, "supported report carries two bytes");
                Ok(MultilevelSwitchCC::SupportedReport {
                    primary: SwitchType::from_u8(payload[0]),
                    secondary: SwitchType::from_u8(payload[1]),
                })
            }
            other => Err(CCError::UnknownCommand {
                cc: 0x26,
                command: other,
            }),
        }
    }

    pub fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            MultilevelSwitchCC::Set {
                target_value,
                duration,
            } => {
                out.push(*target_value);
                if let Some(dur) = duration {
                    out.push(dur.as_u8());
                }
            }
            MultilevelSwitchCC::Get
            | MultilevelSwitchCC::StopLevelChange
            | MultilevelSwitchCC::SupportedGet => {}
            MultilevelSwitchCC::Report {
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
            MultilevelSwitchCC::StartLevelChange {
                direction,
                ignore_start_level,
                start_level,
                duration,
            } => {
                let mut flags = 0u8;
                if *direction == LevelChangeDirection::Down {
                    flags |= 0x40;
                }
                if *ignore_start_level {
                    flags |= 0x20;
                }
                out.push(flags);
                out.push(*start_level);
                if let Some(dur) = duration {
                    out.push(dur.as_u8());
                }
            }
            MultilevelSwitchCC::SupportedReport { primary, secondary } => {
                out.push(primary.as_u8());
                out.push(secondary.as_u8());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_80_percent() {
        let mut out = Vec::new();
        MultilevelSwitchCC::set(80).write_payload(&mut out);
        assert_eq!(out, vec![80]);
    }

    #[test]
    fn set_with_duration_roundtrip() {
        let cc = MultilevelSwitchCC::Set {
            target_value: 50,
            duration: Some(Duration::Minutes(2)),
        };
        let mut out = Vec::new();
        cc.write_payload(&mut out);
        assert_eq!(out, vec![50, 0x81]);
        assert_eq!(MultilevelSwitchCC::parse(SET, &out).unwrap(), cc);
    }

    #[test]
    fn start_level_change_roundtrip() {
        let cc = MultilevelSwitchCC::StartLevelChange {
            direction: LevelChangeDirection::Down,
            ignore_start_level: true,
            start_level: 30,
            duration: Some(Duration::Seconds(4)),
        };
        let mut out = Vec::new();
        cc.write_payload(&mut out);
        assert_eq!(out, vec![0x60, 30, 0x04]);
        assert_eq!(MultilevelSwitchCC::parse(START_LEVEL_CHANGE, &out).unwrap(), cc);
    }

    #[test]
    fn supported_report_switch_types() {
        let cc = MultilevelSwitchCC::parse(SUPPORTED_REPORT, &[0x03, 0x00]).unwrap();
        assert_eq!(
            cc,
            MultilevelSwitchCC::SupportedReport {
                primary: SwitchType::CloseOpen,
                secondary: SwitchType::NotSupported,
            }
        );
    }

    #[test]
    fn switch_type_labels() {
        assert_eq!(SwitchType::DownUp.direction_labels(), ("Down", "Up"));
        assert_eq!(SwitchType::CloseOpen.direction_labels(), ("Close", "Open"));
    }

    #[test]
    fn report_unknown_current() {
        let cc = MultilevelSwitchCC::parse(REPORT, &[0xFE, 80, 0x00]).unwrap();
        assert_eq!(
            cc,
            MultilevelSwitchCC::Report {
                current_value: None,
                target_value: Some(80),
                duration: Some(Duration::Instant),
            }
        );
    }
}
