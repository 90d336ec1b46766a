//! Security engine state: key store, S0 nonce exchange, S2 SPAN/MPAN.
//!
//! The engine owns everything the security CCs cannot express as pure
//! codec work: per-node nonce stores, SPAN progression, and the key
//! material. It is owned by the driver and never shared across nodes'
//! threads (the driver is single-writer).

pub mod keys;
pub mod s0;
pub mod s2;

pub use keys::{KeyStore, SecurityClass};
pub use s0::{s0_decrypt, s0_encrypt, S0NonceStore, NONCE_TTL};
pub use s2::{ResyncDecision, S2Engine, SpanState};
