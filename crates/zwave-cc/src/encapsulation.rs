//! Encapsulation resolution.
//!
//! Encoding applies layers innermost to outermost in a fixed order:
//! application CC, CRC-16 (if requested), Multi Channel (if the target
//! endpoint is not the root), Supervision (if requested), Security S0/S2
//! (if the node is secure), and finally Transport Service when the result
//! exceeds the single-frame budget. Decoding unwraps recursively and
//! records the ordered stack it saw.

use std::time::Instant;

use crate::cc::{
    transport_service, Crc16CC, MultiChannelCC, SecurityS0CC, SecurityS2CC, SupervisionCC, CC,
};
use crate::error::CCError;
use crate::security::s0::{s0_decrypt, s0_encrypt, S0NonceStore};
use crate::security::s2::S2Engine;
use zwave_crypto::NetworkKeys;

/// Largest single-frame CC payload without security.
pub const SINGLE_FRAME_MTU: usize = 46;
/// Largest single-frame CC payload under Security S0.
pub const SINGLE_FRAME_MTU_S0: usize = 39;

/// Hard cap on nesting while decoding.
const MAX_ENCAP_DEPTH: usize = 8;

/// Frame-direction addressing: `source_node` sent the frame to
/// `dest_node`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CCAddress {
    pub home_id: u32,
    pub source_node: u8,
    pub dest_node: u8,
}

/// One decoded encapsulation layer, outermost first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncapsulationKind {
    Crc16,
    MultiChannel {
        source_endpoint: u8,
        destination_endpoint: u8,
    },
    Supervision {
        session_id: u8,
        status_updates: bool,
    },
    SecurityS0,
    SecurityS2,
}

/// The innermost CC plus the ordered encapsulation stack around it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct DecodedCC {
    pub inner: CC,
    /// Outermost layer first.
    pub stack: Vec<EncapsulationKind>,
}

impl DecodedCC {
    /// The endpoint the inner CC addresses (0 = root).
    pub fn endpoint(&self) -> u8 {
        self.stack
            .iter()
            .find_map(|kind| match kind {
                EncapsulationKind::MultiChannel {
                    destination_endpoint,
                    ..
                } => Some(*destination_endpoint),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// The endpoint an inbound CC originated from (0 = root).
    pub fn source_endpoint(&self) -> u8 {
        self.stack
            .iter()
            .find_map(|kind| match kind {
                EncapsulationKind::MultiChannel {
                    source_endpoint, ..
                } => Some(*source_endpoint),
                _ => None,
            })
            .unwrap_or(0)
    }

    /// The supervision session wrapping the inner CC, if any.
    pub fn supervision_session(&self) -> Option<u8> {
        self.stack.iter().find_map(|kind| match kind {
            EncapsulationKind::Supervision { session_id, .. } => Some(*session_id),
            _ => None,
        })
    }

    /// Whether any security layer protected the frame.
    pub fn is_secure(&self) -> bool {
        self.stack
            .iter()
            .any(|kind| matches!(kind, EncapsulationKind::SecurityS0 | EncapsulationKind::SecurityS2))
    }
}

/// A requested supervision wrapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisionRequest {
    pub session_id: u8,
    pub status_updates: bool,
}

/// How to protect an outgoing frame.
pub enum SecurityParams<'a> {
    None,
    S0 {
        keys: &'a NetworkKeys,
        sender_nonce: [u8; 8],
        receiver_nonce: [u8; 8],
    },
    S2 {
        engine: &'a mut S2Engine,
        /// Sender entropy input to attach as a SPAN extension (first frame
        /// after establishment).
        span_extension: Option<[u8; 16]>,
    },
}

/// Encode-side options. Defaults address the root endpoint with no extra
/// layers.
#[derive(Debug, Clone, Copy, Default)]
pub struct EncodeOptions {
    pub endpoint: u8,
    pub crc16: bool,
    pub supervision: Option<SupervisionRequest>,
    /// Session id used if Transport Service segmentation kicks in.
    pub transport_session_id: u8,
}

/// Apply the encapsulation stack and return one or more transmit-ready CC
/// frames (more than one only when Transport Service segmented).
pub fn encode_stack(
    cc: &CC,
    addr: &CCAddress,
    opts: &EncodeOptions,
    security: SecurityParams<'_>,
) -> Result<Vec<Vec<u8>>, CCError> {
    let mut bytes = cc.serialize();

    if opts.crc16 {
        bytes = CC::Crc16(Crc16CC::Encap { inner: bytes }).serialize();
    }

    if opts.endpoint != 0 {
        bytes = CC::MultiChannel(MultiChannelCC::CmdEncap {
            source_endpoint: 0,
            destination_endpoint: opts.endpoint,
            inner: bytes,
        })
        .serialize();
    }

    if let Some(supervision) = &opts.supervision {
        bytes = CC::Supervision(SupervisionCC::Get {
            session_id: supervision.session_id,
            status_updates: supervision.status_updates,
            inner: bytes,
        })
        .serialize();
    }

    let mtu = if matches!(&security, SecurityParams::S0 { .. }) {
        SINGLE_FRAME_MTU_S0
    } else {
        SINGLE_FRAME_MTU
    };

    match security {
        SecurityParams::None => {}
        SecurityParams::S0 {
            keys,
            sender_nonce,
            receiver_nonce,
        } => {
            let encap = s0_encrypt(
                keys,
                &sender_nonce,
                &receiver_nonce,
                addr.source_node,
                addr.dest_node,
                &bytes,
            );
            bytes = CC::SecurityS0(SecurityS0CC::CommandEncap(encap)).serialize();
        }
        SecurityParams::S2 {
            engine,
            span_extension,
        } => {
            let mut encap = engine.encrypt(
                addr.dest_node,
                addr.source_node,
                addr.dest_node,
                addr.home_id,
                &bytes,
            )?;
            if let Some(sender_ei) = span_extension {
                encap
                    .extensions
                    .push(crate::cc::S2Extension::Span { sender_ei });
            }
            bytes = CC::SecurityS2(SecurityS2CC::MessageEncap(encap)).serialize();
        }
    }

    if bytes.len() > mtu {
        let segments = transport_service::segment_datagram(&bytes, opts.transport_session_id)?;
        return Ok(segments
            .into_iter()
            .map(|seg| CC::TransportService(seg).serialize())
            .collect());
    }

    Ok(vec![bytes])
}

/// Decrypt-capable state handed to [`decode_stack`]. Absent engines turn
/// the corresponding security frames into errors.
pub struct DecodeSecurity<'a> {
    pub s0: Option<(&'a NetworkKeys, &'a mut S0NonceStore)>,
    pub s2: Option<&'a mut S2Engine>,
}

impl DecodeSecurity<'_> {
    pub fn none() -> DecodeSecurity<'static> {
        DecodeSecurity { s0: None, s2: None }
    }
}

/// Recursively unwrap a received CC frame.
///
/// Transport Service frames are returned as the inner CC unchanged: the
/// caller owns segment reassembly and feeds the completed datagram back
/// through this function.
pub fn decode_stack(
    bytes: &[u8],
    addr: &CCAddress,
    security: &mut DecodeSecurity<'_>,
) -> Result<DecodedCC, CCError> {
    let mut stack = Vec::new();
    let mut bytes = bytes.to_vec();

    for _ in 0..MAX_ENCAP_DEPTH {
        let cc = CC::parse(&bytes)?;
        match cc {
            CC::Crc16(Crc16CC::Encap { inner }) => {
                stack.push(EncapsulationKind::Crc16);
                bytes = inner;
            }
            CC::MultiChannel(MultiChannelCC::CmdEncap {
                source_endpoint,
                destination_endpoint,
                inner,
            }) => {
                stack.push(EncapsulationKind::MultiChannel {
                    source_endpoint,
                    destination_endpoint,
                });
                bytes = inner;
            }
            CC::Supervision(SupervisionCC::Get {
                session_id,
                status_updates,
                inner,
            }) => {
                stack.push(EncapsulationKind::Supervision {
                    session_id,
                    status_updates,
                });
                bytes = inner;
            }
            CC::SecurityS0(SecurityS0CC::CommandEncap(encap)) => {
                let Some((keys, store)) = security.s0.as_mut() else {
                    return Err(CCError::NonceMissing(encap.nonce_id));
                };
                let nonce = store
                    .take(encap.nonce_id, addr.source_node, Instant::now())
                    .ok_or(CCError::NonceMissing(encap.nonce_id))?;
                bytes = s0_decrypt(keys, &encap, &nonce, addr.source_node, addr.dest_node)?;
                stack.push(EncapsulationKind::SecurityS0);
            }
            CC::SecurityS2(SecurityS2CC::MessageEncap(encap)) => {
                let Some(engine) = security.s2.as_mut() else {
                    return Err(CCError::SpanNotSynced(addr.source_node));
                };
                // A SPAN extension (re-)establishes the generator against
                // the entropy we issued in our last NonceReport.
                if let Some(sender_ei) = encap.extensions.iter().find_map(|ext| match ext {
                    crate::cc::S2Extension::Span { sender_ei } => Some(*sender_ei),
                    _ => None,
                }) {
                    if let Some(receiver_ei) = engine.take_issued_receiver_ei(addr.source_node) {
                        engine.establish_span(addr.source_node, &sender_ei, &receiver_ei);
                    }
                }
                bytes = engine.decrypt(
                    addr.source_node,
                    addr.source_node,
                    addr.dest_node,
                    addr.home_id,
                    &encap,
                )?;
                stack.push(EncapsulationKind::SecurityS2);
            }
            inner => {
                return Ok(DecodedCC { inner, stack });
            }
        }
    }
    Err(CCError::MalformedCC("encapsulation nested too deeply"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cc::{BasicCC, BinarySwitchCC, MultilevelSwitchCC, TransportServiceCC};
    use crate::cc::{DatagramReassembler, ReassemblyOutcome};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const ADDR: CCAddress = CCAddress {
        home_id: 0xC951_AA20,
        source_node: 1,
        dest_node: 5,
    };

    /// The same frame seen from the receiving side.
    const ADDR_RX: CCAddress = ADDR;

    #[test]
    fn plain_cc_passes_through() {
        let cc = CC::BinarySwitch(BinarySwitchCC::Get);
        let frames = encode_stack(&cc, &ADDR, &EncodeOptions::default(), SecurityParams::None)
            .unwrap();
        assert_eq!(frames, vec![vec![0x25, 0x02]]);

        let decoded = decode_stack(&frames[0], &ADDR_RX, &mut DecodeSecurity::none()).unwrap();
        assert_eq!(decoded.inner, cc);
        assert!(decoded.stack.is_empty());
        assert_eq!(decoded.endpoint(), 0);
    }

    #[test]
    fn multi_channel_wire_layout() {
        let cc = CC::BinarySwitch(BinarySwitchCC::Get);
        let opts = EncodeOptions {
            endpoint: 2,
            ..Default::default()
        };
        let frames = encode_stack(&cc, &ADDR, &opts, SecurityParams::None).unwrap();
        assert_eq!(frames, vec![vec![0x60, 0x0D, 0x00, 0x02, 0x25, 0x02]]);

        let decoded = decode_stack(&frames[0], &ADDR_RX, &mut DecodeSecurity::none()).unwrap();
        assert_eq!(decoded.inner, cc);
        assert_eq!(decoded.endpoint(), 2);
        assert_eq!(
            decoded.stack,
            vec![EncapsulationKind::MultiChannel {
                source_endpoint: 0,
                destination_endpoint: 2,
            }]
        );
    }

    #[test]
    fn supervision_wraps_outside_multi_channel() {
        let cc = CC::MultilevelSwitch(MultilevelSwitchCC::set(80));
        let opts = EncodeOptions {
            endpoint: 3,
            supervision: Some(SupervisionRequest {
                session_id: 9,
                status_updates: false,
            }),
            ..Default::default()
        };
        let frames = encode_stack(&cc, &ADDR, &opts, SecurityParams::None).unwrap();
        let frame = &frames[0];
        // Outermost is Supervision Get.
        assert_eq!(&frame[..2], &[0x6C, 0x01]);

        let decoded = decode_stack(frame, &ADDR_RX, &mut DecodeSecurity::none()).unwrap();
        assert_eq!(decoded.inner, cc);
        assert_eq!(decoded.supervision_session(), Some(9));
        assert_eq!(decoded.endpoint(), 3);
        assert!(matches!(
            decoded.stack[0],
            EncapsulationKind::Supervision { session_id: 9, .. }
        ));
        assert!(matches!(
            decoded.stack[1],
            EncapsulationKind::MultiChannel { destination_endpoint: 3, .. }
        ));
    }

    #[test]
    fn crc16_is_innermost_wrapper() {
        let cc = CC::Basic(BasicCC::Get);
        let opts = EncodeOptions {
            endpoint: 1,
            crc16: true,
            ..Default::default()
        };
        let frames = encode_stack(&cc, &ADDR, &opts, SecurityParams::None).unwrap();
        let frame = &frames[0];
        // Multi Channel outside, CRC-16 inside.
        assert_eq!(frame[0], 0x60);

        let decoded = decode_stack(frame, &ADDR_RX, &mut DecodeSecurity::none()).unwrap();
        assert_eq!(decoded.inner, cc);
        assert_eq!(decoded.stack.len(), 2);
        assert!(matches!(decoded.stack[0], EncapsulationKind::MultiChannel { .. }));
        assert_eq!(decoded.stack[1], EncapsulationKind::Crc16);
    }

    #[test]
    fn s0_end_to_end() {
        let keys = NetworkKeys::derive(&[0x0F; 16]);
        let mut receiver_store = S0NonceStore::new();
        let mut rng = StdRng::seed_from_u64(3);

        // Receiver issues a nonce for node 1 (the sender); sender picks its
        // own nonce and encrypts.
        let receiver_nonce = receiver_store.generate(ADDR.source_node, &mut rng);
        let cc = CC::BinarySwitch(BinarySwitchCC::set(true));
        let frames = encode_stack(
            &cc,
            &ADDR,
            &EncodeOptions::default(),
            SecurityParams::S0 {
                keys: &keys,
                sender_nonce: [0x77; 8],
                receiver_nonce,
            },
        )
        .unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0][0], 0x98);

        let mut security = DecodeSecurity {
            s0: Some((&keys, &mut receiver_store)),
            s2: None,
        };
        let decoded = decode_stack(&frames[0], &ADDR_RX, &mut security).unwrap();
        assert_eq!(decoded.inner, cc);
        assert_eq!(decoded.stack, vec![EncapsulationKind::SecurityS0]);
        assert!(decoded.is_secure());
    }

    #[test]
    fn s0_without_nonce_fails() {
        let keys = NetworkKeys::derive(&[0x0F; 16]);
        let mut store = S0NonceStore::new();
        let mut rng = StdRng::seed_from_u64(3);
        let receiver_nonce = store.generate(ADDR.source_node, &mut rng);

        let frames = encode_stack(
            &CC::Basic(BasicCC::Get),
            &ADDR,
            &EncodeOptions::default(),
            SecurityParams::S0 {
                keys: &keys,
                sender_nonce: [0x01; 8],
                receiver_nonce,
            },
        )
        .unwrap();

        // A different (empty) store has never issued that nonce.
        let mut empty = S0NonceStore::new();
        let mut security = DecodeSecurity {
            s0: Some((&keys, &mut empty)),
            s2: None,
        };
        assert!(matches!(
            decode_stack(&frames[0], &ADDR_RX, &mut security),
            Err(CCError::NonceMissing(_))
        ));
    }

    #[test]
    fn s2_end_to_end() {
        let keys = NetworkKeys::derive(&[0x42; 16]);
        let mut sender = S2Engine::new(keys);
        let mut receiver = S2Engine::new(keys);
        sender.establish_span(ADDR.dest_node, &[0x01; 16], &[0x02; 16]);
        receiver.establish_span(ADDR.source_node, &[0x01; 16], &[0x02; 16]);

        let cc = CC::MultilevelSwitch(MultilevelSwitchCC::set(42));
        let frames = encode_stack(
            &cc,
            &ADDR,
            &EncodeOptions::default(),
            SecurityParams::S2 {
                engine: &mut sender,
                span_extension: None,
            },
        )
        .unwrap();
        assert_eq!(frames[0][0], 0x9F);

        let mut security = DecodeSecurity {
            s0: None,
            s2: Some(&mut receiver),
        };
        let decoded = decode_stack(&frames[0], &ADDR_RX, &mut security).unwrap();
        assert_eq!(decoded.inner, cc);
        assert_eq!(decoded.stack, vec![EncapsulationKind::SecurityS2]);
    }

    #[test]
    fn oversized_frame_gets_segmented() {
        // A capability report with many CCs pushes past the 46-byte budget.
        let cc = CC::MultiChannel(crate::cc::MultiChannelCC::CapabilityReport {
            endpoint: 1,
            generic_class: 0x10,
            specific_class: 0x01,
            supported_ccs: (0u8..60).map(|i| 0x20 + i).collect(),
        });
        let frames = encode_stack(&cc, &ADDR, &EncodeOptions::default(), SecurityParams::None)
            .unwrap();
        assert!(frames.len() > 1);
        for frame in &frames {
            assert!(frame.len() <= SINGLE_FRAME_MTU, "segment exceeds MTU: {}", frame.len());
            assert_eq!(frame[0], 0x55);
        }

        // Reassemble and decode the datagram.
        let mut reassembler = DatagramReassembler::new();
        let mut datagram = None;
        for frame in &frames {
            let parsed = CC::parse(frame).unwrap();
            let CC::TransportService(segment) = parsed else {
                panic!("expected transport service frame");
            };
            if let ReassemblyOutcome::Complete { datagram: d, .. } = reassembler.handle(&segment)
            {
                datagram = Some(d);
            }
        }
        let datagram = datagram.expect("datagram should complete");
        let decoded = decode_stack(&datagram, &ADDR_RX, &mut DecodeSecurity::none()).unwrap();
        assert_eq!(decoded.inner, cc);
    }

    #[test]
    fn transport_service_frames_are_not_recursed() {
        let seg = TransportServiceCC::SegmentComplete { session_id: 2 };
        let wire = CC::TransportService(seg.clone()).serialize();
        let decoded = decode_stack(&wire, &ADDR_RX, &mut DecodeSecurity::none()).unwrap();
        assert_eq!(decoded.inner, CC::TransportService(seg));
        assert!(decoded.stack.is_empty());
    }

    #[test]
    fn nesting_depth_bounded() {
        // Build a frame nested deeper than the decoder allows.
        let mut bytes = CC::Basic(BasicCC::Get).serialize();
        for _ in 0..(MAX_ENCAP_DEPTH + 1) {
            bytes = CC::MultiChannel(MultiChannelCC::CmdEncap {
                source_endpoint: 0,
                destination_endpoint: 1,
                inner: bytes,
            })
            .serialize();
        }
        assert!(matches!(
            decode_stack(&bytes, &ADDR_RX, &mut DecodeSecurity::none()),
            Err(CCError::MalformedCC(_))
        ));
    }
}
