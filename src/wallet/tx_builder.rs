// Transaction builder

use super::error::{Result, WalletError};
use crate::config::SUBSIDY;
use crate::core::{Transaction, TxInput, TxOutput};
use crate::storage::Storage;
use crate::wallet::{Address, Wallet, Wallets};

/// Coinbase paying the block subsidy to `to`.
/// Without `data` a random suffix keeps repeated rewards to one address distinct.
pub fn new_coinbase_tx(to: &Address, data: Option<Vec<u8>>) -> Result<Transaction> {
    let pubkey_hash = to.to_pubkey_hash()?;
    let data = data.unwrap_or_else(|| {
        format!("Reward to '{}' {}", to, hex::encode(rand::random::<[u8; 20]>())).into_bytes()
    });

    Ok(Transaction::coinbase(pubkey_hash, SUBSIDY, data))
}

/// Builds signed transactions from a wallet's unspent outputs
pub struct TransactionBuilder<'a> {
    wallets: &'a Wallets,
    storage: &'a Storage,
}

impl<'a> TransactionBuilder<'a> {
    pub fn new(wallets: &'a Wallets, storage: &'a Storage) -> Self {
        Self { wallets, storage }
    }

    /// Build a transaction sending `amount` from a wallet address to `to`
    pub fn build(&self, from: &Address, to: &Address, amount: u64) -> Result<Transaction> {
        let wallet = self
            .wallets
            .get_wallet(from)
            .ok_or_else(|| WalletError::UnknownAddress(from.to_string()))?;

        build_transaction(wallet, to, amount, self.storage)
    }
}

/// Select outputs first-found until they cover `amount`, pay `amount` to `to`,
/// return any excess to the sender, then sign once the id is fixed
pub fn build_transaction(
    wallet: &Wallet,
    to: &Address,
    amount: u64,
    storage: &Storage,
) -> Result<Transaction> {
    if amount == 0 {
        return Err(WalletError::ZeroAmount);
    }
    let recipient = to.to_pubkey_hash()?;
    let sender = wallet.pubkey_hash();

    let (accumulated, outpoints) = storage.utxo_set.find_spendable(&sender, amount)?;
    if accumulated < amount {
        return Err(WalletError::InsufficientFunds {
            needed: amount,
            available: accumulated,
        });
    }

    let inputs = outpoints
        .iter()
        .map(|op| TxInput::new(op.txid, op.vout, wallet.pubkey_bytes()))
        .collect();

    let mut outputs = vec![TxOutput::new(amount, recipient)];
    if accumulated > amount {
        outputs.push(TxOutput::new(accumulated - amount, sender));
    }

    let mut tx = Transaction::new(inputs, outputs);
    storage
        .blockchain
        .sign_transaction(&mut tx, &wallet.secret_key)?;

    log::debug!("Built transaction {} sending {} to {}", tx.id, amount, to);
    Ok(tx)
}
