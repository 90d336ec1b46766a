//! AES-128-CMAC (RFC 4493) message authentication.

use aes::Aes128;
use cmac::{Cmac, Mac};

use crate::CryptoError;

type CmacAes128 = Cmac<Aes128>;

/// Compute the AES-128-CMAC of `data` under `key`.
#[must_use]
pub fn aes128_cmac(key: &[u8; 16], data: &[u8]) -> [u8; 16] {
    let mut mac = CmacAes128::new_from_slice(key).expect("AES-128-CMAC accepts 16-byte keys");
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Verify a left-truncated CMAC (S0 and S2 carry 8-byte MACs).
///
/// The comparison is constant-time in the underlying `cmac` crate.
pub fn aes128_cmac_verify_truncated(
    key: &[u8; 16],
    data: &[u8],
    expected: &[u8],
) -> Result<(), CryptoError> {
    let mut mac = CmacAes128::new_from_slice(key).expect("AES-128-CMAC accepts 16-byte keys");
    mac.update(data);
    mac.verify_truncated_left(expected)
        .map_err(|_| CryptoError::MacMismatch)
}
