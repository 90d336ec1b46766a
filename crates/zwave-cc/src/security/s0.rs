//! S0 nonce store and frame protection.
//!
//! S0 is a strict request/response scheme: the sender asks for a nonce,
//! the receiver issues an 8-byte nonce identified by its first byte, and
//! the encrypted frame references that id. Issued nonces are single-use
//! and expire after [`NONCE_TTL`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

use zwave_crypto::{
    aes128_cbc_decrypt, aes128_cbc_encrypt, aes128_cmac, aes128_cmac_verify_truncated,
    NetworkKeys,
};

use crate::cc::security_s0::{S0Encap, COMMAND_ENCAP};
use crate::error::CCError;

/// How long an issued nonce stays valid.
pub const NONCE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
struct IssuedNonce {
    nonce: [u8; 8],
    node_id: u8,
    created: Instant,
}

/// Nonces this driver has issued to peers, keyed by nonce id.
#[derive(Debug, Default)]
pub struct S0NonceStore {
    issued: HashMap<u8, IssuedNonce>,
}

impl S0NonceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh nonce for `node_id`. The first byte doubles as the
    /// nonce id and is kept unique among live nonces.
    pub fn generate<R: Rng>(&mut self, node_id: u8, rng: &mut R) -> [u8; 8] {
        loop {
            let mut nonce = [0u8; 8];
            rng.fill(&mut nonce[..]);
            if self.issued.contains_key(&nonce[0]) {
                continue;
            }
            self.issued.insert(
                nonce[0],
                IssuedNonce {
                    nonce,
                    node_id,
                    created: Instant::now(),
                },
            );
            return nonce;
        }
    }

    /// Consume the nonce with the given id. Returns `None` if it was never
    /// issued, was already used, belongs to another node, or has expired.
    pub fn take(&mut self, nonce_id: u8, node_id: u8, now: Instant) -> Option<[u8; 8]> {
        let entry = self.issued.remove(&nonce_id)?;
        if entry.node_id != node_id {
            return None;
        }
        if now.duration_since(entry.created) > NONCE_TTL {
            return None;
        }
        Some(entry.nonce)
    }

    /// Drop everything past its TTL.
    pub fn purge_expired(&mut self, now: Instant) {
        self.issued
            .retain(|_, entry| now.duration_since(entry.created) <= NONCE_TTL);
    }

    pub fn len(&self) -> usize {
        self.issued.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issued.is_empty()
    }
}

fn s0_iv(sender_nonce: &[u8; 8], receiver_nonce: &[u8; 8]) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..8].copy_from_slice(sender_nonce);
    iv[8..].copy_from_slice(receiver_nonce);
    iv
}

/// Authentication input: `sender || receiver || command || src || dst ||
/// ciphertext`.
fn s0_auth_data(
    sender_nonce: &[u8; 8],
    receiver_nonce: &[u8; 8],
    src: u8,
    dst: u8,
    ciphertext: &[u8],
) -> Vec<u8> {
    let mut data = Vec::with_capacity(16 + 3 + ciphertext.len());
    data.extend_from_slice(sender_nonce);
    data.extend_from_slice(receiver_nonce);
    data.push(COMMAND_ENCAP);
    data.push(src);
    data.push(dst);
    data.extend_from_slice(ciphertext);
    data
}

/// Protect a serialized inner CC for transmission.
///
/// The plaintext is length-prefixed so the zero pad can be stripped exactly
/// on decryption.
pub fn s0_encrypt(
    keys: &NetworkKeys,
    sender_nonce: &[u8; 8],
    receiver_nonce: &[u8; 8],
    src: u8,
    dst: u8,
    inner: &[u8],
) -> S0Encap {
    let mut plaintext = Vec::with_capacity(inner.len() + 1);
    plaintext.push(inner.len() as u8);
    plaintext.extend_from_slice(inner);

    let iv = s0_iv(sender_nonce, receiver_nonce);
    let ciphertext = aes128_cbc_encrypt(&keys.enc_key, &iv, &plaintext);

    let auth = s0_auth_data(sender_nonce, receiver_nonce, src, dst, &ciphertext);
    let full_mac = aes128_cmac(&keys.auth_key, &auth);
    let mac: [u8; 8] = full_mac[..8].try_into().expect("cmac yields 16 bytes");

    S0Encap {
        sender_nonce: *sender_nonce,
        ciphertext,
        nonce_id: receiver_nonce[0],
        mac,
    }
}

/// Verify and decrypt a received CommandEncap against the receiver nonce
/// it references. Returns the inner serialized CC.
pub fn s0_decrypt(
    keys: &NetworkKeys,
    encap: &S0Encap,
    receiver_nonce: &[u8; 8],
    src: u8,
    dst: u8,
) -> Result<Vec<u8>, CCError> {
    let auth = s0_auth_data(&encap.sender_nonce, receiver_nonce, src, dst, &encap.ciphertext);
    aes128_cmac_verify_truncated(&keys.auth_key, &auth, &encap.mac)
        .map_err(|_| CCError::MacFailed)?;

    let iv = s0_iv(&encap.sender_nonce, receiver_nonce);
    let padded = aes128_cbc_decrypt(&keys.enc_key, &iv, &encap.ciphertext)?;

    let len = *padded.first().ok_or(CCError::MalformedCC("empty s0 plaintext"))? as usize;
    if padded.len() < 1 + len {
        return Err(CCError::MalformedCC("s0 plaintext length out of range"));
    }
    Ok(padded[1..1 + len].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn keys() -> NetworkKeys {
        NetworkKeys::derive(&[0x0F; 16])
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let keys = keys();
        let sender_nonce = [0x11; 8];
        let receiver_nonce = [0x22; 8];
        let inner = [0x25, 0x01, 0xFF];

        let encap = s0_encrypt(&keys, &sender_nonce, &receiver_nonce, 1, 5, &inner);
        assert_eq!(encap.nonce_id, 0x22);
        assert_eq!(encap.ciphertext.len() % 16, 0);

        let plain = s0_decrypt(&keys, &encap, &receiver_nonce, 1, 5).unwrap();
        assert_eq!(plain, inner);
    }

    #[test]
    fn tampered_ciphertext_fails_mac() {
        let keys = keys();
        let mut encap = s0_encrypt(&keys, &[0x11; 8], &[0x22; 8], 1, 5, &[0x25, 0x02]);
        encap.ciphertext[0] ^= 0x01;
        assert_eq!(
            s0_decrypt(&keys, &encap, &[0x22; 8], 1, 5),
            Err(CCError::MacFailed)
        );
    }

    #[test]
    fn addressing_is_authenticated() {
        let keys = keys();
        let encap = s0_encrypt(&keys, &[0x11; 8], &[0x22; 8], 1, 5, &[0x25, 0x02]);
        // Replaying to a different destination must fail.
        assert_eq!(
            s0_decrypt(&keys, &encap, &[0x22; 8], 1, 6),
            Err(CCError::MacFailed)
        );
    }

    #[test]
    fn wrong_receiver_nonce_fails() {
        let keys = keys();
        let encap = s0_encrypt(&keys, &[0x11; 8], &[0x22; 8], 1, 5, &[0x25, 0x02]);
        assert!(s0_decrypt(&keys, &encap, &[0x23; 8], 1, 5).is_err());
    }

    #[test]
    fn nonce_store_single_use() {
        let mut store = S0NonceStore::new();
        let mut rng = StdRng::seed_from_u64(7);
        let nonce = store.generate(5, &mut rng);
        let now = Instant::now();

        assert_eq!(store.take(nonce[0], 5, now), Some(nonce));
        // Second take must fail: single use.
        assert_eq!(store.take(nonce[0], 5, now), None);
    }

    #[test]
    fn nonce_store_wrong_node_rejected() {
        let mut store = S0NonceStore::new();
        let mut rng = StdRng::seed_from_u64(7);
        let nonce = store.generate(5, &mut rng);
        assert_eq!(store.take(nonce[0], 6, Instant::now()), None);
    }

    #[test]
    fn nonce_expires_after_ttl() {
        let mut store = S0NonceStore::new();
        let mut rng = StdRng::seed_from_u64(7);
        let nonce = store.generate(5, &mut rng);

        let later = Instant::now() + NONCE_TTL + Duration::from_secs(1);
        assert_eq!(store.take(nonce[0], 5, later), None);
    }

    #[test]
    fn purge_drops_only_expired() {
        let mut store = S0NonceStore::new();
        let mut rng = StdRng::seed_from_u64(7);
        let _ = store.generate(5, &mut rng);
        let _ = store.generate(6, &mut rng);
        assert_eq!(store.len(), 2);

        store.purge_expired(Instant::now());
        assert_eq!(store.len(), 2);

        store.purge_expired(Instant::now() + NONCE_TTL + Duration::from_secs(1));
        assert!(store.is_empty());
    }

    #[test]
    fn nonce_ids_unique() {
        let mut store = S0NonceStore::new();
        let mut rng = StdRng::seed_from_u64(1);
        let mut ids = std::collections::HashSet::new();
        for _ in 0..32 {
            let nonce = store.generate(5, &mut rng);
            assert!(ids.insert(nonce[0]), "nonce id reused");
        }
    }
}
