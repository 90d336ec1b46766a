//! Manufacturer Specific CC (0x72).

use crate::error::CCError;
use crate::validate_payload;

pub const GET: u8 = 0x04;
pub const REPORT: u8 = 0x05;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManufacturerSpecificCC {
    Get,
    Report {
        manufacturer_id: u16,
        product_type: u16,
        product_id: u16,
    },
}

impl ManufacturerSpecificCC {
    pub fn command(&self) -> u8 {
        match self {
            ManufacturerSpecificCC::Get => GET,
            ManufacturerSpecificCC::Report { .. } => REPORT,
        }
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command {
            GET => {
                validate_payload!(payload.is_empty(), "manufacturer get carries no payload");
                Ok(ManufacturerSpecificCC::Get)
            }
            REPORT => {
                validate_payload!(payload.len() >= 6, "manufacturer report carries six bytes");
                Ok(ManufacturerSpecificCC::Report {
                    manufacturer_id: u16::from_be_bytes([payload[0], payload[1]]),
                    product_type: u16::from_be_bytes([payload[2], payload[3]]),
                    product_id: u16::from_be_bytes([payload[4], payload[5]]),
                })
            }
            other => Err(CCError::UnknownCommand {
                cc: 0x72,
                command: other,
            }),
        }
    }

    pub fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            ManufacturerSpecificCC::Get => {}
            ManufacturerSpecificCC::Report {
                manufacturer_id,
                product_type,
                product_id,
            } => {
                out.extend_from_slice(&manufacturer_id.to_be_bytes());
                out.extend_from_slice(&product_type.to_be_bytes());
                out.extend_from_slice(&product_id.to_be_bytes());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_roundtrip() {
        let cc = ManufacturerSpecificCC::Report {
            manufacturer_id: 0x0086,
            product_type: 0x0002,
            product_id: 0x0064,
        };
        let mut out = Vec::new();
        cc.write_payload(&mut out);
        assert_eq!(out, vec![0x00, 0x86, 0x00, 0x02, 0x00, 0x64]);
        assert_eq!(ManufacturerSpecificCC::parse(REPORT, &out).unwrap(), cc);
    }

    #[test]
    fn truncated_report_rejected() {
        assert!(ManufacturerSpecificCC::parse(REPORT, &[0x00, 0x86, 0x00]).is_err());
    }
}
