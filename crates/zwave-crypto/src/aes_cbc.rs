//! AES-128-CBC encryption and decryption.
//!
//! S0 frames carry an explicit plaintext length, so padding is plain zero
//! fill to the block size and the caller strips it after decryption. The IV
//! (the concatenated sender and receiver nonces) is passed explicitly and
//! never part of the ciphertext output.

extern crate alloc;
use alloc::vec::Vec;

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};

use crate::{CryptoError, BLOCK_SIZE};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Encrypt `plaintext` with AES-128-CBC, zero-padded to the block size.
///
/// An empty plaintext yields an empty ciphertext.
#[must_use]
pub fn aes128_cbc_encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let padded_len = plaintext.len().div_ceil(BLOCK_SIZE) * BLOCK_SIZE;
    let mut padded = alloc::vec![0u8; padded_len];
    padded[..plaintext.len()].copy_from_slice(plaintext);

    let mut out = alloc::vec![0u8; padded_len];
    Aes128CbcEnc::new(key.into(), iv.into())
        .encrypt_padded_b2b_mut::<NoPadding>(&padded, &mut out)
        .expect("output buffer is block-aligned and same size as padded input");
    out
}

/// Decrypt `ciphertext` with AES-128-CBC.
///
/// Returns the zero-padded plaintext; the caller is responsible for
/// stripping the pad using its out-of-band length.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidLength`] if the ciphertext is not a
/// multiple of 16 bytes.
pub fn aes128_cbc_decrypt(
    key: &[u8; 16],
    iv: &[u8; 16],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if ciphertext.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidLength {
            expected: BLOCK_SIZE,
            actual: ciphertext.len(),
        });
    }

    let mut buf = ciphertext.to_vec();
    let decrypted = Aes128CbcDec::new(key.into(), iv.into())
        .decrypt_padded_mut::<NoPadding>(&mut buf)
        .map_err(|_| CryptoError::DecryptFailed)?;
    Ok(decrypted.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nist_zero_vector() {
        // AES-128(key=0, block=0) with a zero IV: the classic ECB vector.
        let ct = aes128_cbc_encrypt(&[0u8; 16], &[0u8; 16], &[0u8; 16]);
        assert_eq!(hex::encode(&ct), "66e94bd4ef8a2c3b884cfa59ca342b2e");
    }

    #[test]
    fn empty_plaintext_yields_empty_ciphertext() {
        let ct = aes128_cbc_encrypt(&[0x42; 16], &[0x24; 16], &[]);
        assert!(ct.is_empty());
        assert_eq!(aes128_cbc_decrypt(&[0x42; 16], &[0x24; 16], &[]).unwrap(), &[]);
    }

    #[test]
    fn roundtrip_with_pad_strip() {
        let key = [0x11; 16];
        let iv = [0x22; 16];
        for size in [1usize, 7, 15, 16, 17, 32, 33, 100] {
            let data: Vec<u8> = (0..size).map(|i| (i & 0xFF) as u8).collect();
            let ct = aes128_cbc_encrypt(&key, &iv, &data);
            assert_eq!(ct.len() % BLOCK_SIZE, 0, "not block-aligned for size {size}");
            let padded = aes128_cbc_decrypt(&key, &iv, &ct).unwrap();
            assert_eq!(&padded[..size], &data[..], "roundtrip mismatch for size {size}");
            assert!(padded[size..].iter().all(|&b| b == 0), "pad not zero for size {size}");
        }
    }

    #[test]
    fn unaligned_ciphertext_rejected() {
        let result = aes128_cbc_decrypt(&[0; 16], &[0; 16], &[0u8; 15]);
        assert_eq!(
            result,
            Err(CryptoError::InvalidLength { expected: 16, actual: 15 })
        );
    }

    #[test]
    fn iv_changes_ciphertext() {
        let key = [0x11; 16];
        let data = [0xAB; 16];
        let a = aes128_cbc_encrypt(&key, &[0x01; 16], &data);
        let b = aes128_cbc_encrypt(&key, &[0x02; 16], &data);
        assert_ne!(a, b);
    }
}
