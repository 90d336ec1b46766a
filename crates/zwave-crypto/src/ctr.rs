//! AES-128-CTR keystream generation.
//!
//! The S2 SPAN generator advances its inner state by drawing keystream
//! bytes; this module exposes exactly that primitive.

extern crate alloc;
use alloc::vec::Vec;

use aes::Aes128;
use ctr::cipher::{KeyIvInit, StreamCipher};

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Produce `len` keystream bytes for `key` starting at counter block `iv`.
#[must_use]
pub fn aes128_ctr_keystream(key: &[u8; 16], iv: &[u8; 16], len: usize) -> Vec<u8> {
    let mut buf = alloc::vec![0u8; len];
    let mut cipher = Aes128Ctr::new(key.into(), iv.into());
    cipher.apply_keystream(&mut buf);
    buf
}
