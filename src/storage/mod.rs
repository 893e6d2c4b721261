// Storage layer for blockchain and UTXO set

mod blockchain_db;
mod error;
mod utxo_set;

pub use blockchain_db::{BLOCKS_TREE, BlockStatus, Blockchain, BlockchainIterator};
pub use error::{ChainError, Result};
pub use utxo_set::{CHAINSTATE_TREE, OutPoint, Utxo, UtxoSet, decode_outputs, encode_outputs};

use crate::consensus::Miner;
use crate::core::{Block, Transaction};
use sled::Db;
use std::path::Path;

/// Storage manager - one sled database holding the chain and its UTXO index
pub struct Storage {
    pub blockchain: Blockchain,
    pub utxo_set: UtxoSet,
}

impl Storage {
    /// Create a new chain at `path` and index its genesis block
    pub fn create<P: AsRef<Path>>(path: P, genesis_coinbase: Transaction, miner: Miner) -> Result<Self> {
        let db = sled::open(path)?;
        Self::with_blockchain(&db, Blockchain::create(&db, genesis_coinbase, miner)?)
    }

    /// Open the chain stored at `path`
    pub fn open<P: AsRef<Path>>(path: P, miner: Miner) -> Result<Self> {
        let db = sled::open(path)?;
        Self::with_blockchain(&db, Blockchain::open(&db, miner)?)
    }

    /// Create an in-memory storage (for testing)
    pub fn memory(genesis_coinbase: Transaction, miner: Miner) -> Result<Self> {
        let db = Self::memory_db()?;
        Self::with_blockchain(&db, Blockchain::create(&db, genesis_coinbase, miner)?)
    }

    /// In-memory storage sharing an existing genesis block
    pub fn memory_from_genesis(genesis: Block, miner: Miner) -> Result<Self> {
        let db = Self::memory_db()?;
        Self::with_blockchain(&db, Blockchain::from_genesis(&db, genesis, miner)?)
    }

    fn memory_db() -> Result<Db> {
        Ok(sled::Config::new().temporary(true).open()?)
    }

    fn with_blockchain(db: &Db, blockchain: Blockchain) -> Result<Self> {
        let utxo_set = UtxoSet::new(db)?;
        if utxo_set.count_transactions() == 0 {
            utxo_set.reindex(&blockchain)?;
        }

        Ok(Self {
            blockchain,
            utxo_set,
        })
    }

    /// Rebuild the UTXO index from the chain
    pub fn reindex(&self) -> Result<()> {
        self.utxo_set.reindex(&self.blockchain)
    }
}
