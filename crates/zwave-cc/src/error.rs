//! Command Class layer errors.

use crate::security::keys::SecurityClass;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CCError {
    /// A payload failed a [`validate_payload!`](crate::validate_payload)
    /// assertion. Decoding aborts with no partial state.
    #[error("malformed command class payload: {0}")]
    MalformedCC(&'static str),

    #[error("unknown command class: 0x{0:02x}")]
    UnknownCommandClass(u8),

    #[error("unknown command 0x{command:02x} for command class 0x{cc:02x}")]
    UnknownCommand { cc: u8, command: u8 },

    /// The driver holds no key for the security class a frame requires.
    #[error("no key loaded for security class {0:?}")]
    MissingKeys(SecurityClass),

    /// S0 decryption was attempted with no matching receiver nonce.
    #[error("no nonce available (id 0x{0:02x})")]
    NonceMissing(u8),

    /// An S0 MAC or S2 CCM tag failed to verify.
    #[error("message authentication failed")]
    MacFailed,

    /// The S2 SPAN for a peer is not established.
    #[error("SPAN not synchronized with node {0}")]
    SpanNotSynced(u8),

    #[error("crypto error: {0}")]
    Crypto(#[from] zwave_crypto::CryptoError),

    /// Payload exceeds what Transport Service can carry.
    #[error("datagram too large: {0} bytes")]
    DatagramTooLarge(usize),
}

/// Assert a payload condition; on failure, abort decoding with
/// [`CCError::MalformedCC`] naming the violated expectation.
#[macro_export]
macro_rules! validate_payload {
    ($cond:expr, $what:expr) => {
        if !$cond {
            return Err($crate::error::CCError::MalformedCC($what));
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_pair(payload: &[u8]) -> Result<(u8, u8), CCError> {
        validate_payload!(payload.len() >= 2, "need two bytes");
        Ok((payload[0], payload[1]))
    }

    #[test]
    fn validate_payload_passes() {
        assert_eq!(parse_pair(&[1, 2]).unwrap(), (1, 2));
    }

    #[test]
    fn validate_payload_aborts() {
        assert_eq!(
            parse_pair(&[1]),
            Err(CCError::MalformedCC("need two bytes"))
        );
    }

    #[test]
    fn display_is_informative() {
        let err = CCError::UnknownCommand { cc: 0x25, command: 0x7F };
        assert!(err.to_string().contains("0x7f"));
        assert!(err.to_string().contains("0x25"));
    }
}
