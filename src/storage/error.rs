// Errors raised by the ledger store

use crate::consensus::PowError;
use crate::core::{CodecError, Hash256, TransactionError};
use sled::transaction::{ConflictableTransactionError, TransactionError as SledTxError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),

    #[error("corrupt record: {0}")]
    Codec(#[from] CodecError),

    #[error("blockchain already exists")]
    ChainExists,

    #[error("no existing blockchain found, create one first")]
    NoChain,

    #[error("block {0} not found")]
    BlockNotFound(Hash256),

    #[error("transaction {0} not found")]
    TransactionNotFound(Hash256),

    #[error("invalid transaction {0}")]
    InvalidTransaction(Hash256),

    #[error("block {0} fails proof of work")]
    InvalidBlock(Hash256),

    #[error("mining failed: {0}")]
    Pow(#[from] PowError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl From<SledTxError<ChainError>> for ChainError {
    fn from(err: SledTxError<ChainError>) -> Self {
        match err {
            SledTxError::Abort(e) => e,
            SledTxError::Storage(e) => ChainError::Database(e),
        }
    }
}

/// Abort a sled transaction with a ledger error
pub(crate) fn abort<E: Into<ChainError>>(err: E) -> ConflictableTransactionError<ChainError> {
    ConflictableTransactionError::Abort(err.into())
}

pub type Result<T> = std::result::Result<T, ChainError>;
