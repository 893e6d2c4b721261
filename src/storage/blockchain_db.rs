// Blockchain database using sled

use super::error::{ChainError, Result, abort};
use super::utxo_set::Utxo;
use crate::consensus::Miner;
use crate::core::{Block, Hash256, PrevTransactions, PubKeyHash, Serializable, Transaction};
use secp256k1::SecretKey;
use sled::transaction::ConflictableTransactionResult;
use sled::{Db, Tree};
use std::collections::HashMap;

/// Tree holding every known block, keyed by hash
pub const BLOCKS_TREE: &str = "blocks";

/// Key of the tip hash inside the blocks tree
const TIP_KEY: &[u8] = b"l";

/// What `add_block` did with a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
    /// Already stored, nothing changed
    Duplicate,
    /// Stored, tip unchanged
    Stored,
    /// Stored as the direct child of the old tip, which it replaced
    Extended,
    /// Stored as a taller tip that does not extend the old one
    NewTip,
}

/// Hash-linked block store with a single tip
pub struct Blockchain {
    db: Db,
    blocks: Tree,
    miner: Miner,
}

impl Blockchain {
    /// Mine a genesis block around `genesis_coinbase` and start a new chain
    pub fn create(db: &Db, genesis_coinbase: Transaction, miner: Miner) -> Result<Self> {
        Self::ensure_empty(db)?;
        let genesis = miner.mine_block(vec![genesis_coinbase], Hash256::zero(), 0)?;
        Self::from_genesis(db, genesis, miner)
    }

    /// Start a new chain from an already mined genesis block
    pub fn from_genesis(db: &Db, genesis: Block, miner: Miner) -> Result<Self> {
        let blocks = Self::ensure_empty(db)?;
        if !genesis.is_genesis() || genesis.height != 0 || !miner.validate(&genesis) {
            return Err(ChainError::InvalidBlock(genesis.hash));
        }

        let hash = genesis.hash;
        let bytes = genesis.serialize();
        blocks.transaction(|tx_db| -> ConflictableTransactionResult<(), ChainError> {
            tx_db.insert(hash.as_bytes().as_slice(), bytes.as_slice())?;
            tx_db.insert(TIP_KEY, hash.as_bytes().as_slice())?;
            Ok(())
        })?;
        db.flush()?;

        log::info!("Created blockchain with genesis block {}", hash);

        Ok(Self {
            db: db.clone(),
            blocks,
            miner,
        })
    }

    /// Open the chain stored in `db`
    pub fn open(db: &Db, miner: Miner) -> Result<Self> {
        let blocks = db.open_tree(BLOCKS_TREE)?;
        if !blocks.contains_key(TIP_KEY)? {
            return Err(ChainError::NoChain);
        }

        Ok(Self {
            db: db.clone(),
            blocks,
            miner,
        })
    }

    fn ensure_empty(db: &Db) -> Result<Tree> {
        let blocks = db.open_tree(BLOCKS_TREE)?;
        if blocks.contains_key(TIP_KEY)? {
            return Err(ChainError::ChainExists);
        }
        Ok(blocks)
    }

    pub fn miner(&self) -> &Miner {
        &self.miner
    }

    /// Hash of the tallest block
    pub fn tip_hash(&self) -> Result<Hash256> {
        let raw = self.blocks.get(TIP_KEY)?.ok_or(ChainError::NoChain)?;
        Ok(Hash256::from_slice(&raw)?)
    }

    /// Verify `transactions`, mine them into a block on the tip and store it
    pub fn mine_block(&self, transactions: Vec<Transaction>) -> Result<Block> {
        for tx in &transactions {
            if !self.verify_transaction(tx)? {
                log::warn!("Refusing to mine invalid transaction {}", tx.id);
                return Err(ChainError::InvalidTransaction(tx.id));
            }
        }

        let tip = self.get_block(&self.tip_hash()?)?;
        let block = self
            .miner
            .mine_block(transactions, tip.hash, tip.height + 1)?;
        self.add_block(&block)?;

        Ok(block)
    }

    /// Store a block; the tip moves only to a strictly taller block.
    /// Adding a block twice changes nothing.
    pub fn add_block(&self, block: &Block) -> Result<BlockStatus> {
        if !self.miner.validate(block) {
            return Err(ChainError::InvalidBlock(block.hash));
        }

        let hash = block.hash;
        let bytes = block.serialize();

        let status = self
            .blocks
            .transaction(|tx_db| -> ConflictableTransactionResult<BlockStatus, ChainError> {
                if tx_db.get(hash.as_bytes().as_slice())?.is_some() {
                    return Ok(BlockStatus::Duplicate);
                }
                tx_db.insert(hash.as_bytes().as_slice(), bytes.as_slice())?;

                let Some(raw_tip) = tx_db.get(TIP_KEY)? else {
                    return Err(abort(ChainError::NoChain));
                };
                let tip_hash = Hash256::from_slice(&raw_tip).map_err(abort)?;
                let raw_tip_block = tx_db
                    .get(tip_hash.as_bytes().as_slice())?
                    .ok_or_else(|| abort(ChainError::BlockNotFound(tip_hash)))?;
                let tip = Block::deserialize(&raw_tip_block).map_err(abort)?;

                if block.height <= tip.height {
                    return Ok(BlockStatus::Stored);
                }

                tx_db.insert(TIP_KEY, hash.as_bytes().as_slice())?;
                if block.prev_hash == tip.hash && block.height == tip.height + 1 {
                    Ok(BlockStatus::Extended)
                } else {
                    Ok(BlockStatus::NewTip)
                }
            })?;

        self.db.flush()?;
        log::debug!("Added block {} at height {}: {:?}", hash, block.height, status);

        Ok(status)
    }

    /// Check proof of work on a block without storing it
    pub fn validate_block(&self, block: &Block) -> bool {
        self.miner.validate(block)
    }

    /// Get a block by hash
    pub fn get_block(&self, hash: &Hash256) -> Result<Block> {
        let raw = self
            .blocks
            .get(hash.as_bytes().as_slice())?
            .ok_or(ChainError::BlockNotFound(*hash))?;
        Ok(Block::deserialize(&raw)?)
    }

    /// Check if a block exists
    pub fn has_block(&self, hash: &Hash256) -> Result<bool> {
        Ok(self.blocks.contains_key(hash.as_bytes().as_slice())?)
    }

    /// Height of the tip block
    pub fn get_best_height(&self) -> Result<u64> {
        Ok(self.get_block(&self.tip_hash()?)?.height)
    }

    /// Every block hash from tip back to genesis
    pub fn get_block_hashes(&self) -> Result<Vec<Hash256>> {
        self.iter()?.map(|block| block.map(|b| b.hash)).collect()
    }

    /// Walk the chain backwards from the tip. Each call starts over.
    pub fn iter(&self) -> Result<BlockchainIterator> {
        Ok(BlockchainIterator {
            blocks: self.blocks.clone(),
            current: Some(self.tip_hash()?),
        })
    }

    /// Find a transaction by id, scanning from tip to genesis
    pub fn find_transaction(&self, id: &Hash256) -> Result<Transaction> {
        for block in self.iter()? {
            if let Some(tx) = block?.find_transaction(id) {
                return Ok(tx.clone());
            }
        }

        Err(ChainError::TransactionNotFound(*id))
    }

    /// Full-chain scan: transaction id -> outputs not spent by any later input
    pub fn find_utxo(&self) -> Result<HashMap<Hash256, Vec<Utxo>>> {
        let mut utxo = HashMap::new();
        self.scan_unspent(|tx, unspent| {
            utxo.insert(tx.id, unspent);
        })?;
        Ok(utxo)
    }

    /// Full-chain scan: transactions with an unspent output locked to `pubkey_hash`
    pub fn find_unspent_transactions(&self, pubkey_hash: &PubKeyHash) -> Result<Vec<Transaction>> {
        let mut found = Vec::new();
        self.scan_unspent(|tx, unspent| {
            if unspent
                .iter()
                .any(|u| u.output.is_locked_with_key(pubkey_hash))
            {
                found.push(tx.clone());
            }
        })?;
        Ok(found)
    }

    /// Visit every transaction that still has unspent outputs.
    /// Walking backwards means a spend is always seen before the output it spends,
    /// including spends later in the same block.
    fn scan_unspent<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&Transaction, Vec<Utxo>),
    {
        let mut spent: HashMap<Hash256, Vec<u32>> = HashMap::new();

        for block in self.iter()? {
            let block = block?;

            for tx in block.transactions.iter().rev() {
                let spent_outputs = spent.get(&tx.id);
                let unspent: Vec<Utxo> = tx
                    .outputs
                    .iter()
                    .enumerate()
                    .map(|(vout, output)| Utxo::new(vout as u32, output.clone()))
                    .filter(|u| spent_outputs.is_none_or(|s| !s.contains(&u.vout)))
                    .collect();

                if !unspent.is_empty() {
                    visit(tx, unspent);
                }

                if !tx.is_coinbase() {
                    for input in &tx.inputs {
                        spent
                            .entry(input.prev_tx_id)
                            .or_default()
                            .push(input.prev_index);
                    }
                }
            }
        }

        Ok(())
    }

    /// Resolve every transaction referenced by `tx`'s inputs
    fn previous_transactions(&self, tx: &Transaction) -> Result<PrevTransactions> {
        let mut prev_txs = PrevTransactions::new();
        for input in &tx.inputs {
            if !prev_txs.contains_key(&input.prev_tx_id) {
                let prev = self.find_transaction(&input.prev_tx_id)?;
                prev_txs.insert(prev.id, prev);
            }
        }
        Ok(prev_txs)
    }

    /// Sign `tx`'s inputs, looking up the spent outputs in the chain
    pub fn sign_transaction(&self, tx: &mut Transaction, secret_key: &SecretKey) -> Result<()> {
        let prev_txs = self.previous_transactions(tx)?;
        tx.sign(secret_key, &prev_txs)?;
        Ok(())
    }

    /// Verify `tx` against the chain. A reference to an unknown transaction
    /// makes it invalid rather than an error.
    pub fn verify_transaction(&self, tx: &Transaction) -> Result<bool> {
        if tx.is_coinbase() {
            return Ok(true);
        }

        match self.previous_transactions(tx) {
            Ok(prev_txs) => Ok(tx.verify(&prev_txs)),
            Err(ChainError::TransactionNotFound(id)) => {
                log::debug!("Transaction {} spends unknown transaction {}", tx.id, id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// Lazy backward walk over the chain; ends after the genesis block
pub struct BlockchainIterator {
    blocks: Tree,
    current: Option<Hash256>,
}

impl Iterator for BlockchainIterator {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;

        let block = match self.blocks.get(hash.as_bytes().as_slice()) {
            Ok(Some(raw)) => Block::deserialize(&raw).map_err(ChainError::from),
            Ok(None) => Err(ChainError::BlockNotFound(hash)),
            Err(e) => Err(ChainError::from(e)),
        };

        if let Ok(block) = &block {
            if !block.is_genesis() {
                self.current = Some(block.prev_hash);
            }
        }

        Some(block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SUBSIDY;
    use crate::core::{TxInput, TxOutput, hash160};
    use secp256k1::Secp256k1;
    use secp256k1::rand::rngs::OsRng;

    const TEST_DIFFICULTY: u32 = 8;

    fn memory_db() -> Db {
        sled::Config::new().temporary(true).open().unwrap()
    }

    fn miner() -> Miner {
        Miner::new(TEST_DIFFICULTY)
    }

    fn coinbase(to: PubKeyHash, tag: &str) -> Transaction {
        Transaction::coinbase(to, SUBSIDY, tag.as_bytes().to_vec())
    }

    fn keypair() -> (SecretKey, Vec<u8>, PubKeyHash) {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = secret_key.public_key(&secp).serialize().to_vec();
        let pubkey_hash = hash160(&public_key);
        (secret_key, public_key, pubkey_hash)
    }

    #[test]
    fn test_create_and_open() {
        let db = memory_db();
        assert!(matches!(
            Blockchain::open(&db, miner()),
            Err(ChainError::NoChain)
        ));

        let chain = Blockchain::create(&db, coinbase([1; 20], "genesis"), miner()).unwrap();
        assert_eq!(chain.get_best_height().unwrap(), 0);

        let genesis = chain.get_block(&chain.tip_hash().unwrap()).unwrap();
        assert!(genesis.is_genesis());
        assert!(chain.validate_block(&genesis));

        assert!(matches!(
            Blockchain::create(&db, coinbase([1; 20], "again"), miner()),
            Err(ChainError::ChainExists)
        ));

        let reopened = Blockchain::open(&db, miner()).unwrap();
        assert_eq!(reopened.tip_hash().unwrap(), genesis.hash);
    }

    #[test]
    fn test_mine_and_iterate() {
        let db = memory_db();
        let chain = Blockchain::create(&db, coinbase([1; 20], "genesis"), miner()).unwrap();
        let genesis_hash = chain.tip_hash().unwrap();

        let b1 = chain.mine_block(vec![coinbase([2; 20], "one")]).unwrap();
        let b2 = chain.mine_block(vec![coinbase([2; 20], "two")]).unwrap();

        assert_eq!(b1.height, 1);
        assert_eq!(b2.height, 2);
        assert_eq!(b2.prev_hash, b1.hash);
        assert_eq!(chain.get_best_height().unwrap(), 2);

        let hashes = chain.get_block_hashes().unwrap();
        assert_eq!(hashes, vec![b2.hash, b1.hash, genesis_hash]);

        // Restartable
        assert_eq!(chain.iter().unwrap().count(), 3);
        assert_eq!(chain.iter().unwrap().count(), 3);
    }

    #[test]
    fn test_find_transaction() {
        let db = memory_db();
        let chain = Blockchain::create(&db, coinbase([1; 20], "genesis"), miner()).unwrap();
        let tx = coinbase([2; 20], "find me");
        chain.mine_block(vec![tx.clone()]).unwrap();

        assert_eq!(chain.find_transaction(&tx.id).unwrap(), tx);

        let missing = Hash256::new([9; 32]);
        assert!(matches!(
            chain.find_transaction(&missing),
            Err(ChainError::TransactionNotFound(id)) if id == missing
        ));
        assert!(matches!(
            chain.get_block(&missing),
            Err(ChainError::BlockNotFound(_))
        ));
    }

    #[test]
    fn test_add_block_status() {
        let db_a = memory_db();
        let chain_a = Blockchain::create(&db_a, coinbase([1; 20], "genesis"), miner()).unwrap();
        let genesis = chain_a.get_block(&chain_a.tip_hash().unwrap()).unwrap();
        let a1 = chain_a.mine_block(vec![coinbase([1; 20], "a1")]).unwrap();
        let a2 = chain_a.mine_block(vec![coinbase([1; 20], "a2")]).unwrap();

        let db_b = memory_db();
        let chain_b = Blockchain::from_genesis(&db_b, genesis.clone(), miner()).unwrap();
        let b1 = chain_b.mine_block(vec![coinbase([2; 20], "b1")]).unwrap();

        // Same height as the tip: stored only
        assert_eq!(chain_a.add_block(&b1).unwrap(), BlockStatus::Stored);
        assert_eq!(chain_a.tip_hash().unwrap(), a2.hash);

        // Idempotent
        assert_eq!(chain_a.add_block(&b1).unwrap(), BlockStatus::Duplicate);
        assert_eq!(chain_a.add_block(&a2).unwrap(), BlockStatus::Duplicate);

        // Taller block on another branch
        assert_eq!(chain_b.add_block(&a1).unwrap(), BlockStatus::Stored);
        assert_eq!(chain_b.add_block(&a2).unwrap(), BlockStatus::NewTip);
        assert_eq!(chain_b.tip_hash().unwrap(), a2.hash);

        // Direct child of the tip
        let db_c = memory_db();
        let chain_c = Blockchain::from_genesis(&db_c, genesis, miner()).unwrap();
        assert_eq!(chain_c.add_block(&a1).unwrap(), BlockStatus::Extended);
        assert_eq!(chain_c.add_block(&a2).unwrap(), BlockStatus::Extended);
    }

    #[test]
    fn test_rejects_block_without_valid_pow() {
        let db = memory_db();
        let chain = Blockchain::create(&db, coinbase([1; 20], "genesis"), miner()).unwrap();
        let mut block = chain.mine_block(vec![coinbase([1; 20], "one")]).unwrap();

        block.transactions[0].outputs[0].value = 1_000;
        assert!(matches!(
            chain.add_block(&block),
            Err(ChainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_sign_verify_and_mine() {
        let (secret_key, public_key, pubkey_hash) = keypair();
        let db = memory_db();
        let chain = Blockchain::create(&db, coinbase(pubkey_hash, "genesis"), miner()).unwrap();
        let funding = chain.find_unspent_transactions(&pubkey_hash).unwrap();
        assert_eq!(funding.len(), 1);

        let mut spend = Transaction::new(
            vec![TxInput::new(funding[0].id, 0, public_key)],
            vec![TxOutput::new(4, [2; 20]), TxOutput::new(6, pubkey_hash)],
        );
        assert!(!chain.verify_transaction(&spend).unwrap());

        chain.sign_transaction(&mut spend, &secret_key).unwrap();
        assert!(chain.verify_transaction(&spend).unwrap());

        let block = chain
            .mine_block(vec![spend.clone(), coinbase(pubkey_hash, "reward")])
            .unwrap();
        assert_eq!(block.transactions.len(), 2);

        let utxo = chain.find_utxo().unwrap();
        assert!(!utxo.contains_key(&funding[0].id));
        let outputs = &utxo[&spend.id];
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].vout, 0);
        assert_eq!(outputs[0].output.value, 4);
    }

    #[test]
    fn test_mine_rejects_invalid_transaction() {
        let (_, public_key, pubkey_hash) = keypair();
        let db = memory_db();
        let chain = Blockchain::create(&db, coinbase(pubkey_hash, "genesis"), miner()).unwrap();
        let funding = chain.find_unspent_transactions(&pubkey_hash).unwrap();

        // Never signed
        let unsigned = Transaction::new(
            vec![TxInput::new(funding[0].id, 0, public_key)],
            vec![TxOutput::new(10, [2; 20])],
        );

        assert!(matches!(
            chain.mine_block(vec![unsigned.clone()]),
            Err(ChainError::InvalidTransaction(id)) if id == unsigned.id
        ));
        assert_eq!(chain.get_best_height().unwrap(), 0);
    }

    #[test]
    fn test_find_utxo_sees_spends_within_a_block() {
        let (secret_key, public_key, pubkey_hash) = keypair();
        let db = memory_db();
        let chain = Blockchain::create(&db, coinbase(pubkey_hash, "genesis"), miner()).unwrap();
        let genesis_tx = chain.find_unspent_transactions(&pubkey_hash).unwrap()[0].clone();

        let mut first = Transaction::new(
            vec![TxInput::new(genesis_tx.id, 0, public_key.clone())],
            vec![TxOutput::new(10, pubkey_hash)],
        );
        chain.sign_transaction(&mut first, &secret_key).unwrap();

        let mut prev = PrevTransactions::new();
        prev.insert(first.id, first.clone());
        let mut second = Transaction::new(
            vec![TxInput::new(first.id, 0, public_key)],
            vec![TxOutput::new(10, [3; 20])],
        );
        second.sign(&secret_key, &prev).unwrap();

        // Assemble directly so the in-block dependency is allowed
        let tip = chain.tip_hash().unwrap();
        let block = chain
            .miner()
            .mine_block(vec![first.clone(), second.clone()], tip, 1)
            .unwrap();
        chain.add_block(&block).unwrap();

        let utxo = chain.find_utxo().unwrap();
        assert!(!utxo.contains_key(&genesis_tx.id));
        assert!(!utxo.contains_key(&first.id));
        assert!(utxo.contains_key(&second.id));
    }
}
