// UTXO ledger: proof-of-work blockchain, wallets and a peer-to-peer node

pub mod cli;
pub mod config;
pub mod consensus;
pub mod core;
pub mod network;
pub mod storage;
pub mod wallet;

// Re-exports for convenience
pub use cli::{Cli, CliError, CliHandler};
pub use config::NodeConfig;
pub use consensus::{Miner, PowError};
pub use core::{Block, BlockHeader, Hash256, Transaction, TxInput, TxOutput};
pub use network::{Message, NetworkError, Node};
pub use storage::{BlockStatus, Blockchain, ChainError, OutPoint, Storage, Utxo, UtxoSet};
pub use wallet::{Address, Wallet, WalletError, Wallets};
