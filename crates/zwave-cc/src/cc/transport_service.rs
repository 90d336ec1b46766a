//! Transport Service CC (0x55): datagram segmentation for payloads that
//! exceed a single frame.
//!
//! The command byte carries data: its top five bits select the command and
//! the low three hold the high bits of the datagram size, so this CC is
//! dispatched on `command & 0xF8`. First and subsequent segments end in a
//! CRC-16/AUG-CCITT over the whole CC (id byte included).

use crate::crc16::crc16_aug_ccitt;
use crate::error::CCError;
use crate::validate_payload;

pub const FIRST_SEGMENT: u8 = 0xC0;
pub const SEGMENT_REQUEST: u8 = 0xC8;
pub const SUBSEQUENT_SEGMENT: u8 = 0xE0;
pub const SEGMENT_COMPLETE: u8 = 0xE8;
pub const SEGMENT_WAIT: u8 = 0xF0;

/// Mask isolating the command from the size bits.
pub const COMMAND_MASK: u8 = 0xF8;

const CC_ID: u8 = 0x55;

/// Largest datagram the 11-bit size field can describe.
pub const MAX_DATAGRAM_SIZE: usize = 0x7FF;

/// Data capacity of a first segment within a 46-byte CC frame.
pub const FIRST_SEGMENT_CAPACITY: usize = 40;
/// Data capacity of a subsequent segment within a 46-byte CC frame.
pub const SUBSEQUENT_SEGMENT_CAPACITY: usize = 39;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportServiceCC {
    FirstSegment {
        session_id: u8,
        datagram_size: u16,
        payload: Vec<u8>,
    },
    SubsequentSegment {
        session_id: u8,
        datagram_size: u16,
        offset: u16,
        payload: Vec<u8>,
    },
    SegmentRequest {
        session_id: u8,
        offset: u16,
    },
    SegmentComplete {
        session_id: u8,
    },
    SegmentWait {
        pending_segments: u8,
    },
}

impl TransportServiceCC {
    /// The full command byte, size bits included.
    pub fn command(&self) -> u8 {
        match self {
            TransportServiceCC::FirstSegment { datagram_size, .. } => {
                FIRST_SEGMENT | ((datagram_size >> 8) as u8 & 0x07)
            }
            TransportServiceCC::SubsequentSegment { datagram_size, .. } => {
                SUBSEQUENT_SEGMENT | ((datagram_size >> 8) as u8 & 0x07)
            }
            TransportServiceCC::SegmentRequest { .. } => SEGMENT_REQUEST,
            TransportServiceCC::SegmentComplete { .. } => SEGMENT_COMPLETE,
            TransportServiceCC::SegmentWait { .. } => SEGMENT_WAIT,
        }
    }

    pub fn parse(command: u8, payload: &[u8]) -> Result<Self, CCError> {
        match command & COMMAND_MASK {
            FIRST_SEGMENT => {
                validate_payload!(payload.len() >= 5, "first segment too short");
                Self::check_crc(command, payload)?;
                let datagram_size = ((command as u16 & 0x07) << 8) | payload[0] as u16;
                Ok(TransportServiceCC::FirstSegment {
                    session_id: payload[1] >> 4,
                    datagram_size,
                    payload: payload[2..payload.len() - 2].to_vec(),
                })
            }
            SUBSEQUENT_SEGMENT => {
                validate_payload!(payload.len() >= 6, "subsequent segment too short");
                Self::check_crc(command, payload)?;
                let datagram_size = ((command as u16 & 0x07) << 8) | payload[0] as u16;
                let offset = ((payload[1] as u16 & 0x0F) << 8) | payload[2] as u16;
                Ok(TransportServiceCC::SubsequentSegment {
                    session_id: payload[1] >> 4,
                    datagram_size,
                    offset,
                    payload: payload[3..payload.len() - 2].to_vec(),
                })
            }
            SEGMENT_REQUEST => {
                validate_payload!(payload.len() >= 2, "segment request carries two bytes");
                Ok(TransportServiceCC::SegmentRequest {
                    session_id: payload[0] >> 4,
                    offset: ((payload[0] as u16 & 0x0F) << 8) | payload[1] as u16,
                })
            }
            SEGMENT_COMPLETE => {
                validate_payload!(payload.len() >= 1, "segment complete carries one byte");
                Ok(TransportServiceCC::SegmentComplete {
                    session_id: payload[0] >> 4,
                })
            }
            SEGMENT_WAIT => {
                validate_payload!(payload.len() >= 1, "segment wait carries one byte");
                Ok(TransportServiceCC::SegmentWait {
                    pending_segments: payload[0],
                })
            }
            other => Err(CCError::UnknownCommand {
                cc: CC_ID,
                command: other,
            }),
        }
    }

    fn check_crc(command: u8, payload: &[u8]) -> Result<(), CCError> {
        let split = payload.len() - 2;
        let mut covered = vec![CC_ID, command];
        covered.extend_from_slice(&payload[..split]);
        let expected = u16::from_be_bytes([payload[split], payload[split + 1]]);
        validate_payload!(
            crc16_aug_ccitt(&covered) == expected,
            "transport service segment checksum mismatch"
        );
        Ok(())
    }

    pub fn write_payload(&self, out: &mut Vec<u8>) {
        let command = self.command();
        let start = out.len();
        match self {
            TransportServiceCC::FirstSegment {
                session_id,
                datagram_size,
                payload,
            } => {
                out.push(*datagram_size as u8);
                out.push(session_id << 4);
                out.extend_from_slice(payload);
            }
            TransportServiceCC::SubsequentSegment {
                session_id,
                datagram_size,
                offset,
                payload,
            } => {
                out.push(*datagram_size as u8);
                out.push((session_id << 4) | ((offset >> 8) as u8 & 0x0F));
                out.push(*offset as u8);
                out.extend_from_slice(payload);
            }
            TransportServiceCC::SegmentRequest { session_id, offset } => {
                out.push((session_id << 4) | ((offset >> 8) as u8 & 0x0F));
                out.push(*offset as u8);
                return;
            }
            TransportServiceCC::SegmentComplete { session_id } => {
                out.push(session_id << 4);
                return;
            }
            TransportServiceCC::SegmentWait { pending_segments } => {
                out.push(*pending_segments);
                return;
            }
        }
        // Trailing CRC over cc id, command byte, and the bytes just written.
        let mut covered = vec![CC_ID, command];
        covered.extend_from_slice(&out[start..]);
        let crc = crc16_aug_ccitt(&covered);
        out.extend_from_slice(&crc.to_be_bytes());
    }
}

/// Split a datagram into transmit-ready segments.
pub fn segment_datagram(
    datagram: &[u8],
    session_id: u8,
) -> Result<Vec<TransportServiceCC>, CCError> {
    if datagram.len() > MAX_DATAGRAM_SIZE {
        return Err(CCError::DatagramTooLarge(datagram.len()));
    }
    let size = datagram.len() as u16;
    let first_len = datagram.len().min(FIRST_SEGMENT_CAPACITY);
    let mut segments = vec![TransportServiceCC::FirstSegment {
        session_id,
        datagram_size: size,
        payload: datagram[..first_len].to_vec(),
    }];

    let mut offset = first_len;
    while offset < datagram.len() {
        let chunk = (datagram.len() - offset).min(SUBSEQUENT_SEGMENT_CAPACITY);
        segments.push(TransportServiceCC::SubsequentSegment {
            session_id,
            datagram_size: size,
            offset: offset as u16,
            payload: datagram[offset..offset + chunk].to_vec(),
        });
        offset += chunk;
    }
    Ok(segments)
}

/// Outcome of feeding one segment to the reassembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReassemblyOutcome {
    InProgress,
    Complete { session_id: u8, datagram: Vec<u8> },
    /// A hole was detected; the sender should resend from `expected_offset`.
    OutOfSync { session_id: u8, expected_offset: u16 },
    /// Segment did not belong to the active session.
    Ignored,
}

/// Sequential reassembly of one datagram at a time per sender.
#[derive(Debug, Default)]
pub struct DatagramReassembler {
    current: Option<InFlight>,
}

#[derive(Debug)]
struct InFlight {
    session_id: u8,
    size: u16,
    buf: Vec<u8>,
}

impl DatagramReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, segment: &TransportServiceCC) -> ReassemblyOutcome {
        match segment {
            TransportServiceCC::FirstSegment {
                session_id,
                datagram_size,
                payload,
            } => {
                let mut inflight = InFlight {
                    session_id: *session_id,
                    size: *datagram_size,
                    buf: payload.clone(),
                };
                if inflight.buf.len() >= inflight.size as usize {
                    inflight.buf.truncate(inflight.size as usize);
                    return ReassemblyOutcome::Complete {
                        session_id: inflight.session_id,
                        datagram: inflight.buf,
                    };
                }
                self.current = Some(inflight);
                ReassemblyOutcome::InProgress
            }
            TransportServiceCC::SubsequentSegment {
                session_id,
                offset,
                payload,
                ..
            } => {
                let Some(inflight) = self.current.as_mut() else {
                    return ReassemblyOutcome::Ignored;
                };
                if inflight.session_id != *session_id {
                    return ReassemblyOutcome::Ignored;
                }
                if *offset as usize != inflight.buf.len() {
                    return ReassemblyOutcome::OutOfSync {
                        session_id: *session_id,
                        expected_offset: inflight.buf.len() as u16,
                    };
                }
                inflight.buf.extend_from_slice(payload);
                if inflight.buf.len() >= inflight.size as usize {
                    let done = self.current.take().expect("just borrowed");
                    let mut datagram = done.buf;
                    datagram.truncate(done.size as usize);
                    return ReassemblyOutcome::Complete {
                        session_id: done.session_id,
                        datagram,
                    };
                }
                ReassemblyOutcome::InProgress
            }
            _ => ReassemblyOutcome::Ignored,
        }
    }
}
