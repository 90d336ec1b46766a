//! Multi Channel CC (0x60): endpoint discovery and endpoint addressing.

use crate::error::CCError;
use crate::validate_payload;

pub const END_POINT_GET: u8 = 0x07;
pub const END_POINT_REPORT: u8 = 0x08;
pub const CAPABILITY_GET: u8 = 0x09;
pub const CAPABILITY_REPORT: u8 = 0x0A;
pub const CMD_ENCAP: u8 = 0x0D;

const CC_ID: u8 = 0x60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MultiChannelCC {
    EndPointGet,
    EndPointReport {
        /// Endpoints may appear and disappear at runtime.
        dynamic: bool,
        /// All endpoints share one capability set.
        identical: bool,
        endpoint_count: u8,
    },
    CapabilityGet {
        endpoint: u8,
    },
    CapabilityReport {
        endpoint: u8,
        generic_class: u8,
        specific_class: u8,
        supported_ccs: Vec<u8>,
    },
    CmdEncap {
        source_endpoint: u8,
        destination_endpoint: u8,
        /// The serialized inner CC.
        inner: Vec<u8>,
    },
}

impl MultiChannelCC {
    pub fn command(&self) -> u8 {
        match self {
            MultiChannelCC::EndPointGet => END_POINT_GET,
            MultiChannelCC::EndPointReport { .. } => END_POINT_REPORT,
            MultiChannelCC::CapabilityGet { .. } => CAPABILITY_GET,
            MultiChannelCC::CapabilityReport { .. } => CAPABILITY_REPORT,
            MultiChannelCC::CmdEncap { .. } => CMD_ENCAP,
        }
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command {
            END_POINT_GET => {
                validate_payload!(payload.is_empty(), "endpoint get carries no payload");
                Ok(MultiChannelCC::EndPointGet)
            }
            END_POINT_REPORT => {
                validate_payload!(payload.len() >= 2, "endpoint report carries two bytes");
                Ok(MultiChannelCC::EndPointReport {
                    dynamic: payload[0] & 0x80 != 0,
                    identical: payload[0] & 0x40 != 0,
                    endpoint_count: payload[1] & 0x7F,
                })
            }
            CAPABILITY_GET => {
                validate_payload!(payload.len() == 1, "capability get names one endpoint");
                Ok(MultiChannelCC::CapabilityGet {
                    endpoint: payload[0] & 0x7F,
                })
            }
            CAPABILITY_REPORT => {
                validate_payload!(payload.len() >= 3, "capability report carries three bytes");
                Ok(MultiChannelCC::CapabilityReport {
                    endpoint: payload[0] & 0x7F,
                    generic_class: payload[1],
                    specific_class: payload[2],
                    supported_ccs: payload[3..].to_vec(),
                })
            }
            CMD_ENCAP => {
                validate_payload!(payload.len() >= 3, "cmd encap needs addressing and a cc");
                Ok(MultiChannelCC::CmdEncap {
                    source_endpoint: payload[0] & 0x7F,
                    destination_endpoint: payload[1] & 0x7F,
                    inner: payload[2..].to_vec(),
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
            MultiChannelCC::EndPointGet => {}
            MultiChannelCC::EndPointReport {
                dynamic,
                identical,
                endpoint_count,
            } => {
                let mut flags = 0u8;
                if *dynamic {
                    flags |= 0x80;
                }
                if *identical {
                    flags |= 0x40;
                }
                out.push(flags);
                out.push(endpoint_count & 0x7F);
            }
            MultiChannelCC::CapabilityGet { endpoint } => out.push(endpoint & 0x7F),
            MultiChannelCC::CapabilityReport {
                endpoint,
                generic_class,
                specific_class,
                supported_ccs,
            } => {
                out.push(endpoint & 0x7F);
                out.push(*generic_class);
                out.push(*specific_class);
                out.extend_from_slice(supported_ccs);
            }
            MultiChannelCC::CmdEncap {
                source_endpoint,
                destination_endpoint,
                inner,
            } => {
                out.push(source_endpoint & 0x7F);
                out.push(destination_endpoint & 0x7F);
                out.extend_from_slice(inner);
            }
        }
    }
}
