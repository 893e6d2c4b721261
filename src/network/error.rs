// Network errors

use crate::core::CodecError;
use crate::storage::ChainError;
use crate::wallet::WalletError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out talking to {0}")]
    Timeout(String),

    #[error("malformed message: {0}")]
    Codec(#[from] CodecError),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("message exceeds {0} bytes")]
    MessageTooLarge(u64),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, NetworkError>;
