// Wallet errors

use crate::storage::ChainError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("address {0} is not in this wallet")]
    UnknownAddress(String),

    #[error("amount must be greater than zero")]
    ZeroAmount,

    #[error("not enough funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("wallet file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wallet file is malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid key: {0}")]
    Key(#[from] secp256k1::Error),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

pub type Result<T> = std::result::Result<T, WalletError>;
