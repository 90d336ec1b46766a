//! AES-128 primitives for the Z-Wave security layers.
//!
//! Everything in this crate is stateless: S0 and S2 session state (nonce
//! stores, SPAN/MPAN progression) lives in the command-class layer. All
//! operations are AES-128; Z-Wave security uses no asymmetric cryptography
//! after inclusion.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod aes_cbc;
pub mod ccm;
pub mod cmac;
pub mod ctr;
pub mod kdf;

pub use aes_cbc::{aes128_cbc_decrypt, aes128_cbc_encrypt};
pub use ccm::{aes128_ccm_decrypt, aes128_ccm_encrypt, CCM_NONCE_SIZE, CCM_TAG_SIZE};
pub use cmac::{aes128_cmac, aes128_cmac_verify_truncated};
pub use ctr::aes128_ctr_keystream;
pub use kdf::{expand_network_key, NetworkKeys};

use core::fmt;

/// AES block size; also the key size everywhere in this crate.
pub const BLOCK_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// Input length violates the primitive's block or minimum-size rule.
    InvalidLength { expected: usize, actual: usize },
    /// An authentication tag or MAC did not verify.
    MacMismatch,
    /// Ciphertext could not be decrypted.
    DecryptFailed,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidLength { expected, actual } => {
                write!(f, "invalid length: expected multiple/minimum of {expected}, got {actual}")
            }
            CryptoError::MacMismatch => write!(f, "MAC verification failed"),
            CryptoError::DecryptFailed => write!(f, "decryption failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CryptoError {}
