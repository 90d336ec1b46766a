//! Push-based frame reassembly.
//!
//! The accumulator consumes the raw byte stream one chunk at a time and
//! emits frame events. It holds no timer of its own: the owner is expected
//! to call [`FrameAccumulator::on_timeout`] when its inter-frame receive
//! timer fires, which discards any partial frame and returns to `Idle`.

extern crate alloc;
use alloc::vec::Vec;

use crate::consts::{MessageType, ACK, CAN, NAK, SOF};
use crate::frame::DataFrame;

/// Events produced while consuming the byte stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameEvent {
    Ack,
    Nak,
    Can,
    /// A complete, checksum-valid data frame.
    Data(DataFrame),
    /// A byte that arrived while idle and is no frame start.
    Discarded(u8),
    /// A complete data frame whose checksum did not match. The caller
    /// answers this with NAK.
    ChecksumMismatch,
    /// The type byte was invalid; the frame is dropped and answered with
    /// NAK like any other corruption.
    InvalidFrame,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Idle,
    /// SOF seen, waiting for the length byte.
    AwaitingLength,
    /// Collecting `remaining` more content bytes (type, function, payload,
    /// checksum).
    Collecting { length: u8, buf: Vec<u8> },
}

/// Reassembles frames from an arbitrary chunking of the byte stream.
#[derive(Debug)]
pub struct FrameAccumulator {
    state: State,
}

impl Default for FrameAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameAccumulator {
    pub fn new() -> Self {
        Self { state: State::Idle }
    }

    /// Whether a data frame is partially assembled.
    pub fn has_partial_frame(&self) -> bool {
        self.state != State::Idle
    }

    /// Discard any partial frame. Called when the inter-frame receive
    /// timeout (1500 ms) fires or the driver shuts down.
    pub fn on_timeout(&mut self) -> bool {
        let had_partial = self.has_partial_frame();
        self.state = State::Idle;
        had_partial
    }

    /// Consume a chunk of received bytes, returning the events it produced.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<FrameEvent> {
        let mut events = Vec::new();
        for &byte in bytes {
            if let Some(ev) = self.push_byte(byte) {
                events.push(ev);
            }
        }
        events
    }

    fn push_byte(&mut self, byte: u8) -> Option<FrameEvent> {
        match &mut self.state {
            State::Idle => match byte {
                SOF => {
                    self.state = State::AwaitingLength;
                    None
                }
                ACK => Some(FrameEvent::Ack),
                NAK => Some(FrameEvent::Nak),
                CAN => Some(FrameEvent::Can),
                other => Some(FrameEvent::Discarded(other)),
            },
            State::AwaitingLength => {
                // A zero or tiny length can never hold type + function +
                // checksum; treat it like a corrupt frame.
                if byte < 3 {
                    self.state = State::Idle;
                    return Some(FrameEvent::InvalidFrame);
                }
                self.state = State::Collecting {
                    length: byte,
                    buf: Vec::with_capacity(byte as usize),
                };
                None
            }
            State::Collecting { length, buf } => {
                buf.push(byte);
                if buf.len() == *length as usize {
                    let length = *length;
                    let content = core::mem::take(buf);
                    self.state = State::Idle;
                    Some(Self::complete(length, content))
                } else {
                    None
                }
            }
        }
    }

    fn complete(length: u8, content: Vec<u8>) -> FrameEvent {
        let mut raw = Vec::with_capacity(content.len() + 2);
        raw.push(SOF);
        raw.push(length);
        raw.extend_from_slice(&content);
        match DataFrame::parse(&raw) {
            Ok(frame) => FrameEvent::Data(frame),
            Err(crate::error::FrameError::ChecksumMismatch { .. }) => {
                FrameEvent::ChecksumMismatch
            }
            Err(_) => FrameEvent::InvalidFrame,
        }
    }
}

/// Convenience for tests and logging: serialize the data frame of an event.
pub fn data_frame(event: &FrameEvent) -> Option<&DataFrame> {
    match event {
        FrameEvent::Data(frame) => Some(frame),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    extern crate alloc;
    use super::*;
    use alloc::vec;

    const VERSION_REQ: &[u8] = &[0x01, 0x03, 0x00, 0x15, 0xE9];

    #[test]
    fn short_frames_emit_immediately() {
        let mut acc = FrameAccumulator::new();
        assert_eq!(acc.push(&[ACK]), vec![FrameEvent::Ack]);
        assert_eq!(acc.push(&[NAK]), vec![FrameEvent::Nak]);
        assert_eq!(acc.push(&[CAN]), vec![FrameEvent::Can]);
    }

    #[test]
    fn garbage_while_idle_is_discarded() {
        let mut acc = FrameAccumulator::new();
        let events = acc.push(&[0x42, 0xFF]);
        assert_eq!(
            events,
            vec![FrameEvent::Discarded(0x42), FrameEvent::Discarded(0xFF)]
        );
    }

    #[test]
    fn whole_frame_in_one_chunk() {
        let mut acc = FrameAccumulator::new();
        let events = acc.push(VERSION_REQ);
        assert_eq!(events.len(), 1);
        let frame = data_frame(&events[0]).expect("should be a data frame");
        assert_eq!(frame.msg_type, MessageType::Request);
        assert_eq!(frame.function, 0x15);
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn frame_split_byte_by_byte() {
        let mut acc = FrameAccumulator::new();
        for &b in &VERSION_REQ[..VERSION_REQ.len() - 1] {
            assert!(acc.push(&[b]).is_empty());
        }
        let events = acc.push(&[VERSION_REQ[VERSION_REQ.len() - 1]]);
        assert!(matches!(events[0], FrameEvent::Data(_)));
    }

    #[test]
    fn frame_surrounded_by_garbage() {
        let mut acc = FrameAccumulator::new();
        let mut stream = vec![0x99, 0x42];
        stream.extend_from_slice(VERSION_REQ);
        stream.push(0x7F);
        let events = acc.push(&stream);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0], FrameEvent::Discarded(0x99));
        assert_eq!(events[1], FrameEvent::Discarded(0x42));
        assert!(matches!(events[2], FrameEvent::Data(_)));
        assert_eq!(events[3], FrameEvent::Discarded(0x7F));
    }

    #[test]
    fn checksum_mismatch_reported() {
        let mut acc = FrameAccumulator::new();
        let events = acc.push(&[0x01, 0x03, 0x00, 0x15, 0xE8]);
        assert_eq!(events, vec![FrameEvent::ChecksumMismatch]);
        assert!(!acc.has_partial_frame());
    }

    #[test]
    fn invalid_type_byte_reported() {
        // type byte 0x07 is neither Request nor Response; checksum is valid.
        let content = [0x03u8, 0x07, 0x15];
        let cs = crate::checksum::frame_checksum(&content);
        let mut acc = FrameAccumulator::new();
        let events = acc.push(&[0x01, 0x03, 0x07, 0x15, cs]);
        assert_eq!(events, vec![FrameEvent::InvalidFrame]);
    }

    #[test]
    fn zero_length_is_invalid() {
        let mut acc = FrameAccumulator::new();
        let events = acc.push(&[SOF, 0x00]);
        assert_eq!(events, vec![FrameEvent::InvalidFrame]);
        assert!(!acc.has_partial_frame());
    }

    #[test]
    fn timeout_discards_partial() {
        let mut acc = FrameAccumulator::new();
        acc.push(&[SOF, 0x05, 0x00]);
        assert!(acc.has_partial_frame());
        assert!(acc.on_timeout());
        assert!(!acc.has_partial_frame());
        // The stream resumes cleanly afterwards.
        let events = acc.push(VERSION_REQ);
        assert!(matches!(events[0], FrameEvent::Data(_)));
    }

    #[test]
    fn timeout_without_partial_is_noop() {
        let mut acc = FrameAccumulator::new();
        assert!(!acc.on_timeout());
    }

    #[test]
    fn ack_then_data_in_one_chunk() {
        let mut acc = FrameAccumulator::new();
        let mut stream = vec![ACK];
        stream.extend_from_slice(VERSION_REQ);
        let events = acc.push(&stream);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], FrameEvent::Ack);
        assert!(matches!(events[1], FrameEvent::Data(_)));
    }
}

#[cfg(test)]
mod proptests {
    extern crate alloc;
    use super::*;
    use crate::frame::DataFrame;
    use alloc::vec::Vec;
    use proptest::prelude::*;

    proptest! {
        /// Any valid frame embedded in garbage is extracted unchanged, no
        /// matter how the stream is chunked.
        #[test]
        fn frame_extracted_from_garbage(
            function in any::<u8>(),
            payload in proptest::collection::vec(any::<u8>(), 0..32),
            // Garbage must avoid frame-start bytes or it would legitimately
            // begin a different frame.
            garbage_before in proptest::collection::vec(
                any::<u8>().prop_filter("no frame bytes", |b| ![0x01, 0x06, 0x15, 0x18].contains(b)),
                0..8,
            ),
            chunk in 1usize..8,
        ) {
            let frame = DataFrame::new(MessageType::Request, function, payload);
            let raw = frame.serialize().unwrap();

            let mut stream: Vec<u8> = garbage_before.clone();
            stream.extend_from_slice(&raw);

            let mut acc = FrameAccumulator::new();
            let mut events = Vec::new();
            for piece in stream.chunks(chunk) {
                events.extend(acc.push(piece));
            }

            let frames: Vec<_> = events
                .iter()
                .filter_map(super::data_frame)
                .collect();
            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(frames[0], &frame);
        }
    }
}
