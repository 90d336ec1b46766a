//! CMAC-based key derivation from a network key.
//!
//! Each security class key is expanded into three purpose-bound keys by
//! encrypting constant blocks. Keys never appear in `Debug` output.

use core::fmt;

use crate::cmac::aes128_cmac;

const ENCRYPTION_CONSTANT: [u8; 16] = [0x55; 16];
const AUTHENTICATION_CONSTANT: [u8; 16] = [0xAA; 16];
const NONCE_CONSTANT: [u8; 16] = [0x26; 16];

/// The three purpose-bound keys derived from one network key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct NetworkKeys {
    /// Payload encryption key (CBC for S0, CCM for S2).
    pub enc_key: [u8; 16],
    /// MAC key for S0 frames.
    pub auth_key: [u8; 16],
    /// Personalization key for the SPAN nonce generator.
    pub nonce_key: [u8; 16],
}

impl NetworkKeys {
    /// Derive the key set from a raw 16-byte network key.
    #[must_use]
    pub fn derive(network_key: &[u8; 16]) -> Self {
        Self {
            enc_key: aes128_cmac(network_key, &ENCRYPTION_CONSTANT),
            auth_key: aes128_cmac(network_key, &AUTHENTICATION_CONSTANT),
            nonce_key: aes128_cmac(network_key, &NONCE_CONSTANT),
        }
    }
}

// Key material must not leak through logs.
impl fmt::Debug for NetworkKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("NetworkKeys(redacted)")
    }
}

/// Free-function form of [`NetworkKeys::derive`].
#[must_use]
pub fn expand_network_key(network_key: &[u8; 16]) -> NetworkKeys {
    NetworkKeys::derive(network_key)
}

#[cfg(test)]
mod tests {
    extern crate alloc;
    use super::*;
    use alloc::format;

    #[test]
    fn keys_are_distinct() {
        let keys = expand_network_key(&[0x0F; 16]);
        assert_ne!(keys.enc_key, keys.auth_key);
        assert_ne!(keys.enc_key, keys.nonce_key);
        assert_ne!(keys.auth_key, keys.nonce_key);
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = expand_network_key(&[0x77; 16]);
        let b = expand_network_key(&[0x77; 16]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_network_keys_diverge() {
        let a = expand_network_key(&[0x01; 16]);
        let b = expand_network_key(&[0x02; 16]);
        assert_ne!(a.enc_key, b.enc_key);
        assert_ne!(a.auth_key, b.auth_key);
        assert_ne!(a.nonce_key, b.nonce_key);
    }

    #[test]
    fn debug_redacts_key_material() {
        let keys = expand_network_key(&[0x42; 16]);
        let rendered = format!("{keys:?}");
        assert_eq!(rendered, "NetworkKeys(redacted)");
        assert!(!rendered.contains("42"));
    }
}
