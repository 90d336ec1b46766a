//! Command Class codec and security engine for the Z-Wave host driver.
//!
//! A Command Class (CC) is a node-addressed application command: one byte of
//! CC id, one command byte (except No Operation), and a command-specific
//! payload. CCs nest: Multi Channel, Supervision, CRC-16, Security S0/S2,
//! and Transport Service all carry another CC as their payload.
//!
//! Parsing dispatches through a `(cc id, command)`-keyed registry; every
//! boundary is guarded by [`validate_payload!`] and aborts without partial
//! state. Serialization is dispatched on the typed command itself.

pub mod cc;
pub mod commandclass;
pub mod crc16;
pub mod encapsulation;
pub mod error;
pub mod registry;
pub mod security;
pub mod types;

pub use cc::CC;
pub use commandclass::CommandClasses;
pub use crc16::crc16_aug_ccitt;
pub use encapsulation::{
    decode_stack, encode_stack, CCAddress, DecodeSecurity, DecodedCC, EncapsulationKind,
    EncodeOptions, SecurityParams, SupervisionRequest, SINGLE_FRAME_MTU, SINGLE_FRAME_MTU_S0,
};
pub use error::CCError;
pub use registry::{default_registry, CCRegistry};
pub use types::Duration;
