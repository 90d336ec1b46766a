//! Serial frame and message codecs for the Z-Wave host driver.
//!
//! This crate defines the two lowest protocol layers: the link-layer frame
//! codec (SOF-delimited data frames plus the single-byte ACK/NAK/CAN frames)
//! and the typed host<->controller message codec dispatched on a function
//! byte. Both layers are pure: they transform bytes and never perform I/O.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod accumulator;
pub mod checksum;
pub mod consts;
pub mod error;
pub mod frame;
pub mod message;

pub use accumulator::{FrameAccumulator, FrameEvent};
pub use checksum::frame_checksum;
pub use consts::{FunctionType, MessageType, ACK, CAN, NAK, SOF};
pub use error::{FrameError, MessageError};
pub use frame::{DataFrame, Frame};
pub use message::{Message, MessageCodec, MessagePayload};
