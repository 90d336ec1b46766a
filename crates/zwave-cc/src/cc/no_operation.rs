//! No Operation CC (0x00).
//!
//! The only CC without a command byte; its single purpose is to ping a node
//! at the protocol level.

use crate::error::CCError;
use crate::validate_payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoOperationCC;

impl NoOperationCC {
    pub fn parse(payload: &[u8]) -> Result<Self, CCError> {
        validate_payload!(payload.is_empty(), "no operation carries no payload");
        Ok(NoOperationCC)
    }
}
