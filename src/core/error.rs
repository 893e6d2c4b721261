// Errors raised by the core data model

use crate::core::Hash256;
use thiserror::Error;

/// Failure to decode bytes into a core structure
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unexpected end of data: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("invalid data: {0}")]
    Invalid(String),
}

/// Failure while signing a transaction
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("previous transaction {0} is not available")]
    MissingPrevious(Hash256),

    #[error("input references output {index} of {txid}, which does not exist")]
    OutputOutOfRange { txid: Hash256, index: u32 },

    #[error("signing failed: {0}")]
    Signing(#[from] secp256k1::Error),
}
