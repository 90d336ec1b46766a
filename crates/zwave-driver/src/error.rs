//! Driver error vocabulary.
//!
//! Recoverable conditions are handled at the layer that has context for
//! them; only [`DriverError::TransportClosed`] and programmer errors reach
//! the driver's top-level event stream.

use crate::storage::StorageError;
use crate::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    /// The serial transport went away. Fatal; the driver stops.
    #[error("transport closed")]
    TransportClosed,

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("driver is shutting down")]
    ShuttingDown,

    #[error("unknown node {0}")]
    UnknownNode(u8),

    #[error(transparent)]
    Transaction(#[from] TransactionFailure),
}

/// Why a transaction did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TransactionFailure {
    /// The controller did not ACK the frame within the ACK timeout, after
    /// all attempts.
    #[error("controller did not acknowledge the frame")]
    AckTimeout,

    /// The controller answered NAK or CAN on every attempt.
    #[error("controller rejected the frame (NAK/CAN)")]
    CanNak,

    #[error("no response within the response timeout")]
    ResponseTimeout,

    #[error("no callback within the callback timeout")]
    CallbackTimeout,

    /// SendData reported the node unreachable after retries.
    #[error("node did not acknowledge the transmission")]
    NodeTimeout,

    /// The controller reported a transmit failure (queue full, no route).
    #[error("controller could not transmit the frame")]
    ControllerFailure,

    #[error("no security nonce available")]
    SecurityNonceMissing,

    #[error("security MAC verification failed")]
    SecurityMacFailed,

    /// The node's Supervision Report ended the session without success.
    #[error("supervised command did not succeed")]
    SupervisionFailed,

    /// The originator withdrew the transaction.
    #[error("transaction cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_display_all_variants() {
        let variants = [
            TransactionFailure::AckTimeout,
            TransactionFailure::CanNak,
            TransactionFailure::ResponseTimeout,
            TransactionFailure::CallbackTimeout,
            TransactionFailure::NodeTimeout,
            TransactionFailure::ControllerFailure,
            TransactionFailure::SecurityNonceMissing,
            TransactionFailure::SecurityMacFailed,
            TransactionFailure::SupervisionFailed,
            TransactionFailure::Cancelled,
        ];
        for v in variants {
            assert!(!v.to_string().is_empty(), "{v:?} should have non-empty Display");
        }
    }

    #[test]
    fn failure_converts_to_driver_error() {
        let err: DriverError = TransactionFailure::Cancelled.into();
        assert!(matches!(err, DriverError::Transaction(TransactionFailure::Cancelled)));
    }
}
