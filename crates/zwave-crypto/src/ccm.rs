//! AES-128-CCM authenticated encryption for Security S2.
//!
//! S2 uses a 13-byte nonce (the SPAN output) and an 8-byte tag appended to
//! the ciphertext. The additional data covers the addressing fields so a
//! frame cannot be replayed to a different destination.

extern crate alloc;
use alloc::vec::Vec;

use aes::Aes128;
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{AeadInPlace, KeyInit};
use ccm::consts::{U13, U8};
use ccm::Ccm;

use crate::CryptoError;

type Aes128Ccm = Ccm<Aes128, U8, U13>;

/// Authentication tag length appended to every S2 ciphertext.
pub const CCM_TAG_SIZE: usize = 8;
/// Nonce length produced by the SPAN generator.
pub const CCM_NONCE_SIZE: usize = 13;

/// Encrypt and authenticate; returns `ciphertext || tag(8)`.
#[must_use]
pub fn aes128_ccm_encrypt(
    key: &[u8; 16],
    nonce: &[u8; CCM_NONCE_SIZE],
    aad: &[u8],
    plaintext: &[u8],
) -> Vec<u8> {
    let cipher = Aes128Ccm::new(key.into());
    let mut buf = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(nonce), aad, &mut buf)
        .expect("payload length is always within the CCM bound for a 13-byte nonce");
    buf.extend_from_slice(&tag);
    buf
}

/// Verify and decrypt `ciphertext || tag(8)`.
///
/// # Errors
///
/// [`CryptoError::InvalidLength`] if the input is shorter than the tag,
/// [`CryptoError::MacMismatch`] if authentication fails.
pub fn aes128_ccm_decrypt(
    key: &[u8; 16],
    nonce: &[u8; CCM_NONCE_SIZE],
    aad: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() < CCM_TAG_SIZE {
        return Err(CryptoError::InvalidLength {
            expected: CCM_TAG_SIZE,
            actual: ciphertext.len(),
        });
    }
    let (body, tag) = ciphertext.split_at(ciphertext.len() - CCM_TAG_SIZE);
    let cipher = Aes128Ccm::new(key.into());
    let mut buf = body.to_vec();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(nonce),
            aad,
            &mut buf,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CryptoError::MacMismatch)?;
    Ok(buf)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn ccm_roundtrip(
            key in any::<[u8; 16]>(),
            nonce in any::<[u8; 13]>(),
            aad in proptest::collection::vec(any::<u8>(), 0..16),
            plaintext in proptest::collection::vec(any::<u8>(), 0..128),
        ) {
            let ct = aes128_ccm_encrypt(&key, &nonce, &aad, &plaintext);
            let pt = aes128_ccm_decrypt(&key, &nonce, &aad, &ct).unwrap();
            prop_assert_eq!(pt, plaintext);
        }
    }
}
