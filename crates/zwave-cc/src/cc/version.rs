//! Version CC (0x86): firmware and per-CC version discovery.

use crate::error::CCError;
use crate::validate_payload;

pub const GET: u8 = 0x11;
pub const REPORT: u8 = 0x12;
pub const COMMAND_CLASS_GET: u8 = 0x13;
pub const COMMAND_CLASS_REPORT: u8 = 0x14;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCC {
    Get,
    Report {
        library_type: u8,
        protocol_version: (u8, u8),
        firmware_version: (u8, u8),
    },
    CommandClassGet {
        cc: u8,
    },
    CommandClassReport {
        cc: u8,
        version: u8,
    },
}

impl VersionCC {
    pub fn command(&self) -> u8 {
        match self {
            VersionCC::Get => GET,
            VersionCC::Report { .. } => REPORT,
            VersionCC::CommandClassGet { .. } => COMMAND_CLASS_GET,
            VersionCC::CommandClassReport { .. } => COMMAND_CLASS_REPORT,
        }
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command {
            GET => {
                validate_payload!(payload.is_empty(), "version get carries no payload");
                Ok(VersionCC::Get)
            }
            REPORT => {
                validate_payload!(payload.len() >= 5, "version report carries five bytes");
                Ok(VersionCC::Report {
                    library_type: payload[0],
                    protocol_version: (payload[1], payload[2]),
                    firmware_version: (payload[3], payload[4]),
                })
            }
            COMMAND_CLASS_GET => {
                validate_payload!(payload.len() == 1, "cc version get names one cc");
                Ok(VersionCC::CommandClassGet { cc: payload[0] })
            }
            COMMAND_CLASS_REPORT => {
                validate_payload!(payload.len() >= 2, "cc version report carries two bytes");
                Ok(VersionCC::CommandClassReport {
                    cc: payload[0],
                    version: payload[1],
                })
            }
            other => Err(CCError::UnknownCommand {
                cc: 0x86,
                command: other,
            }),
        }
    }

    pub fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            VersionCC::Get => {}
            VersionCC::Report {
                library_type,
                protocol_version,
                firmware_version,
            } => {
                out.push(*library_type);
                out.push(protocol_version.0);
                out.push(protocol_version.1);
                out.push(firmware_version.0);
                out.push(firmware_version.1);
            }
            VersionCC::CommandClassGet { cc } => out.push(*cc),
            VersionCC::CommandClassReport { cc, version } => {
                out.push(*cc);
                out.push(*version);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_roundtrip() {
        let cc = VersionCC::Report {
            library_type: 0x06,
            protocol_version: (4, 5),
            firmware_version: (1, 12),
        };
        let mut out = Vec::new();
        cc.write_payload(&mut out);
        assert_eq!(out, vec![0x06, 4, 5, 1, 12]);
        assert_eq!(VersionCC::parse(REPORT, &out).unwrap(), cc);
    }

    #[test]
    fn cc_version_query_roundtrip() {
        let get = VersionCC::CommandClassGet { cc: 0x25 };
        let mut out = Vec::new();
        get.write_payload(&mut out);
        assert_eq!(out, vec![0x25]);

        let report = VersionCC::parse(COMMAND_CLASS_REPORT, &[0x25, 0x02]).unwrap();
        assert_eq!(report, VersionCC::CommandClassReport { cc: 0x25, version: 2 });
    }

    #[test]
    fn truncated_report_rejected() {
        assert!(VersionCC::parse(REPORT, &[0x06, 4, 5, 1]).is_err());
    }
}
