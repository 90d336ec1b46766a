//! Security S2 CC (0x9F) wire format.
//!
//! SPAN establishment and CCM sealing live in [`crate::security::s2`];
//! this module frames sequence numbers, extensions, and ciphertext.

use crate::error::CCError;
use crate::validate_payload;

pub const NONCE_GET: u8 = 0x01;
pub const NONCE_REPORT: u8 = 0x02;
pub const MESSAGE_ENCAP: u8 = 0x03;

const CC_ID: u8 = 0x9F;

const FLAG_EXTENSIONS: u8 = 0x01;

const EXT_TYPE_MASK: u8 = 0x3F;
const EXT_MORE_TO_FOLLOW: u8 = 0x80;

pub const EXT_SPAN: u8 = 0x01;
pub const EXT_MPAN_GROUP: u8 = 0x03;

/// An unencrypted extension carried by MessageEncap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum S2Extension {
    /// Sender entropy input for SPAN (re-)establishment.
    Span { sender_ei: [u8; 16] },
    /// Multicast group addressing.
    MpanGroup { group_id: u8 },
    /// Preserved unknown extension.
    Unknown { ext_type: u8, data: Vec<u8> },
}

impl S2Extension {
    fn ext_type(&self) -> u8 {
        match self {
            S2Extension::Span { .. } => EXT_SPAN,
            S2Extension::MpanGroup { .. } => EXT_MPAN_GROUP,
            S2Extension::Unknown { ext_type, .. } => *ext_type & EXT_TYPE_MASK,
        }
    }

    fn data_len(&self) -> usize {
        match self {
            S2Extension::Span { .. } => 16,
            S2Extension::MpanGroup { .. } => 1,
            S2Extension::Unknown { data, .. } => data.len(),
        }
    }
}

/// The body of a MessageEncap frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S2Encap {
    pub seq: u8,
    pub extensions: Vec<S2Extension>,
    /// CCM output: ciphertext followed by the 8-byte tag.
    pub ciphertext: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityS2CC {
    NonceGet {
        seq: u8,
    },
    NonceReport {
        seq: u8,
        /// Singlecast out of sync: the receiver lost its SPAN.
        sos: bool,
        /// Multicast out of sync.
        mos: bool,
        /// Present iff `sos`.
        receiver_ei: Option<[u8; 16]>,
    },
    MessageEncap(S2Encap),
}

impl SecurityS2CC {
    pub fn command(&self) -> u8 {
        match self {
            SecurityS2CC::NonceGet { .. } => NONCE_GET,
            SecurityS2CC::NonceReport { .. } => NONCE_REPORT,
            SecurityS2CC::MessageEncap(_) => MESSAGE_ENCAP,
        }
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command {
            NONCE_GET => {
                validate_payload!(payload.len() == 1, "nonce get carries a sequence number");
                Ok(SecurityS2CC::NonceGet { seq: payload[0] })
            }
            NONCE_REPORT => {
                validate_payload!(payload.len() >= 2, "nonce report too short");
                let sos = payload[1] & 0x01 != 0;
                let mos = payload[1] & 0x02 != 0;
                let receiver_ei = if sos {
                    validate_payload!(
                        payload.len() >= 18,
                        "sos nonce report carries receiver entropy"
                    );
                    let ei: [u8; 16] = payload[2..18].try_into().expect("length checked above");
                    Some(ei)
                } else {
                    None
                };
                Ok(SecurityS2CC::NonceReport {
                    seq: payload[0],
                    sos,
                    mos,
                    receiver_ei,
                })
            }
            MESSAGE_ENCAP => {
                validate_payload!(payload.len() >= 2, "message encap too short");
                let seq = payload[0];
                let has_extensions = payload[1] & FLAG_EXTENSIONS != 0;
                let mut idx = 2;
                let mut extensions = Vec::new();

                if has_extensions {
                    loop {
                        validate_payload!(payload.len() >= idx + 2, "extension header truncated");
                        let ext_len = payload[idx] as usize;
                        validate_payload!(ext_len >= 2, "extension length too small");
                        validate_payload!(
                            payload.len() >= idx + ext_len,
                            "extension body truncated"
                        );
                        let type_byte = payload[idx + 1];
                        let data = &payload[idx + 2..idx + ext_len];
                        extensions.push(Self::parse_extension(type_byte & EXT_TYPE_MASK, data)?);
                        idx += ext_len;
                        if type_byte & EXT_MORE_TO_FOLLOW == 0 {
                            break;
                        }
                    }
                }

                // The remainder must hold at least the CCM tag.
                validate_payload!(payload.len() >= idx + 8, "message encap missing ccm tag");
                Ok(SecurityS2CC::MessageEncap(S2Encap {
                    seq,
                    extensions,
                    ciphertext: payload[idx..].to_vec(),
                }))
            }
            other => Err(CCError::UnknownCommand {
                cc: CC_ID,
                command: other,
            }),
        }
    }

    fn parse_extension(ext_type: u8, data: &[u8]) -> Result<S2Extension, CCError> {
        match ext_type {
            EXT_SPAN => {
                validate_payload!(data.len() == 16, "span extension carries 16 bytes");
                let sender_ei: [u8; 16] = data.try_into().expect("length checked above");
                Ok(S2Extension::Span { sender_ei })
            }
            EXT_MPAN_GROUP => {
                validate_payload!(data.len() == 1, "mpan group extension carries one byte");
                Ok(S2Extension::MpanGroup { group_id: data[0] })
            }
            other => Ok(S2Extension::Unknown {
                ext_type: other,
                data: data.to_vec(),
            }),
        }
    }

    pub fn write_payload(&self, out: &mut Vec<u8>) {
        match self {
            SecurityS2CC::NonceGet { seq } => out.push(*seq),
            SecurityS2CC::NonceReport {
                seq,
                sos,
                mos,
                receiver_ei,
            } => {
                out.push(*seq);
                let mut flags = 0u8;
                if *sos {
                    flags |= 0x01;
                }
                if *mos {
                    flags |= 0x02;
                }
                out.push(flags);
                if let Some(ei) = receiver_ei {
                    out.extend_from_slice(ei);
                }
            }
            SecurityS2CC::MessageEncap(encap) => {
                out.push(encap.seq);
                out.push(if encap.extensions.is_empty() {
                    0
                } else {
                    FLAG_EXTENSIONS
                });
                for (i, ext) in encap.extensions.iter().enumerate() {
                    let more = i + 1 < encap.extensions.len();
                    out.push((ext.data_len() + 2) as u8);
                    let mut type_byte = ext.ext_type();
                    if more {
                        type_byte |= EXT_MORE_TO_FOLLOW;
                    }
                    out.push(type_byte);
                    match ext {
                        S2Extension::Span { sender_ei } => out.extend_from_slice(sender_ei),
                        S2Extension::MpanGroup { group_id } => out.push(*group_id),
                        S2Extension::Unknown { data, .. } => out.extend_from_slice(data),
                    }
                }
                out.extend_from_slice(&encap.ciphertext);
            }
        }
    }
}
