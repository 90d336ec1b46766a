//! Wake Up CC (0x84).
//!
//! Battery nodes announce wakefulness with a Notification; the driver then
//! drains that node's pending transactions and finishes with
//! NoMoreInformation so the node can sleep again.

use crate::error::CCError;
use crate::validate_payload;

pub const INTERVAL_SET: u8 = 0x04;
pub const INTERVAL_GET: u8 = 0x05;
pub const INTERVAL_REPORT: u8 = 0x06;
pub const NOTIFICATION: u8 = 0x07;
pub const NO_MORE_INFORMATION: u8 = 0x08;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeUpCC {
    IntervalSet {
        seconds: u32,
        /// The node that receives the wake-up notifications.
        target_node: u8,
    },
    IntervalGet,
    IntervalReport {
        seconds: u32,
        target_node: u8,
    },
    Notification,
    NoMoreInformation,
}

fn u24_from_be(bytes: &[u8]) -> u32 {
    ((bytes[0] as u32) << 16) | ((bytes[1] as u32) << 8) | bytes[2] as u32
}

fn push_u24_be(out: &mut Vec<u8>, value: u32) {
    out.push((value >> 16) as u8);
    out.push((value >> 8) as u8);
    out.push(value as u8);
}

impl WakeUpCC {
    pub fn command(&self) -> u8 {
        match self {
            WakeUpCC::IntervalSet { .. } => INTERVAL_SET,
            WakeUpCC::IntervalGet => INTERVAL_GET,
            WakeUpCC::IntervalReport { .. } => INTERVAL_REPORT,
            WakeUpCC::Notification => NOTIFICATION,
            WakeUpCC::NoMoreInformation => NO_MORE_INFORMATION,
        }
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command {
            INTERVAL_SET => {
                validate_payload!(payload.len() >= 4, "interval set carries four bytes");
                Ok(WakeUpCC::IntervalSet {
                    seconds: u24_from_be(payload),
                    target_node: payload[3],
                })
            }
            INTERVAL_GET => {
                validate_payload!(payload.is_empty(), "interval get carries no payload");
                Ok(WakeUpCC::IntervalGet)
            }
            INTERVAL_REPORT => {
                validate_payload!(payload.len() >= 4, "interval report carries four bytes");
                Ok(WakeUpCC::IntervalReport {
                    seconds: u24_from_be(payload),
                    target_node: payload[3],
                })
            }
            NOTIFICATION => {
                validate_payload!(payload.is_empty(), "wake up notification carries no payload");
                Ok(WakeUpCC::Notification)
            }
            NO_MORE_INFORMATION => {
                validate_payload!(payload.is_empty(), "no more information carries no payload");
                Ok(WakeUpCC::NoMoreInformation)
            }
            other => Err(CCError::UnknownCommand {
                cc: 0x84,
                command: other,
            }),
        }
    }

    pub fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            WakeUpCC::IntervalSet {
                seconds,
                target_node,
            }
            | WakeUpCC::IntervalReport {
                seconds,
                target_node,
            } => {
                push_u24_be(out, *seconds);
                out.push(*target_node);
            }
            WakeUpCC::IntervalGet | WakeUpCC::Notification | WakeUpCC::NoMoreInformation => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_report_roundtrip() {
        let cc = WakeUpCC::IntervalReport {
            seconds: 4200,
            target_node: 1,
        };
        let mut out = Vec::new();
        cc.write_payload(&mut out);
        assert_eq!(out, vec![0x00, 0x10, 0x68, 0x01]);
        assert_eq!(WakeUpCC::parse(INTERVAL_REPORT, &out).unwrap(), cc);
    }

    #[test]
    fn u24_range() {
        let cc = WakeUpCC::IntervalSet {
            seconds: 0xFF_FFFF,
            target_node: 1,
        };
        let mut out = Vec::new();
        cc.write_payload(&mut out);
        assert_eq!(WakeUpCC::parse(INTERVAL_SET, &out).unwrap(), cc);
    }

    #[test]
    fn notification_is_empty() {
        assert_eq!(WakeUpCC::parse(NOTIFICATION, &[]).unwrap(), WakeUpCC::Notification);
        assert!(WakeUpCC::parse(NOTIFICATION, &[0x00]).is_err());
    }
}
