// Wallet and transaction building

mod error;
mod keystore;
mod tx_builder;

pub use error::{Result, WalletError};
pub use keystore::{ADDRESS_VERSION, Address, Wallet, Wallets, validate_address};
pub use tx_builder::{TransactionBuilder, build_transaction, new_coinbase_tx};
