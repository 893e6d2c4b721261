// UTXO (Unspent Transaction Output) set management

use super::blockchain_db::Blockchain;
use super::error::{ChainError, Result, abort};
use crate::core::{
    Block, CodecError, Hash256, PubKeyHash, TxOutput, ensure_consumed, read_u32, read_varint,
    write_varint,
};
use sled::transaction::ConflictableTransactionResult;
use sled::{Batch, Db, Tree};
use std::io::Cursor;

/// Tree holding the index, keyed by transaction id
pub const CHAINSTATE_TREE: &str = "chainstate";

/// UTXO identifier - transaction hash + output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Hash256,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: Hash256, vout: u32) -> Self {
        Self { txid, vout }
    }
}

/// One unspent output together with its index in the creating transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utxo {
    pub vout: u32,
    pub output: TxOutput,
}

impl Utxo {
    pub fn new(vout: u32, output: TxOutput) -> Self {
        Self { vout, output }
    }
}

/// Encode the unspent outputs of one transaction
pub fn encode_outputs(utxos: &[Utxo]) -> Vec<u8> {
    let mut bytes = Vec::new();
    write_varint(&mut bytes, utxos.len() as u64).unwrap();
    for utxo in utxos {
        bytes.extend_from_slice(&utxo.vout.to_le_bytes());
        bytes.extend_from_slice(&utxo.output.serialize());
    }
    bytes
}

pub fn decode_outputs(bytes: &[u8]) -> std::result::Result<Vec<Utxo>, CodecError> {
    let mut cursor = Cursor::new(bytes);
    let count = read_varint(&mut cursor)? as usize;

    let mut utxos = Vec::new();
    for _ in 0..count {
        let vout = read_u32(&mut cursor)?;
        let output = TxOutput::deserialize(&mut cursor)?;
        utxos.push(Utxo::new(vout, output));
    }

    ensure_consumed(&cursor)?;
    Ok(utxos)
}

/// Index of unspent outputs derived from the chain.
/// Never the source of truth: `reindex` rebuilds it from the blocks.
pub struct UtxoSet {
    db: Db,
    chainstate: Tree,
}

impl UtxoSet {
    pub fn new(db: &Db) -> Result<Self> {
        Ok(Self {
            db: db.clone(),
            chainstate: db.open_tree(CHAINSTATE_TREE)?,
        })
    }

    /// Replace the whole index with one full scan of the chain
    pub fn reindex(&self, chain: &Blockchain) -> Result<()> {
        let utxo = chain.find_utxo()?;

        let mut batch = Batch::default();
        for key in self.chainstate.iter().keys() {
            batch.remove(key?);
        }
        for (txid, outputs) in &utxo {
            batch.insert(txid.as_bytes().as_slice(), encode_outputs(outputs));
        }

        self.chainstate.apply_batch(batch)?;
        self.db.flush()?;

        log::info!("Reindexed UTXO set: {} transactions", utxo.len());
        Ok(())
    }

    /// Apply one block that directly extends the indexed chain:
    /// drop the outputs its inputs spend, add all of its outputs
    pub fn update(&self, block: &Block) -> Result<()> {
        self.chainstate
            .transaction(|tx_db| -> ConflictableTransactionResult<(), ChainError> {
                for tx in &block.transactions {
                    if !tx.is_coinbase() {
                        for input in &tx.inputs {
                            let key = input.prev_tx_id.as_bytes().as_slice();
                            let Some(raw) = tx_db.get(key)? else {
                                continue;
                            };

                            let mut outputs = decode_outputs(&raw).map_err(abort)?;
                            outputs.retain(|u| u.vout != input.prev_index);

                            if outputs.is_empty() {
                                tx_db.remove(key)?;
                            } else {
                                tx_db.insert(key, encode_outputs(&outputs))?;
                            }
                        }
                    }

                    let outputs: Vec<Utxo> = tx
                        .outputs
                        .iter()
                        .enumerate()
                        .map(|(vout, output)| Utxo::new(vout as u32, output.clone()))
                        .collect();
                    tx_db.insert(tx.id.as_bytes().as_slice(), encode_outputs(&outputs))?;
                }
                Ok(())
            })?;

        self.db.flush()?;
        log::debug!("Updated UTXO set with block {}", block.hash);
        Ok(())
    }

    /// Collect outputs locked to `pubkey_hash`, first found first, until
    /// their sum reaches `amount`. Returns the sum and the outputs chosen.
    pub fn find_spendable(&self, pubkey_hash: &PubKeyHash, amount: u64) -> Result<(u64, Vec<OutPoint>)> {
        let mut accumulated = 0u64;
        let mut outpoints = Vec::new();

        'scan: for item in self.chainstate.iter() {
            let (key, value) = item?;
            let txid = Hash256::from_slice(&key)?;

            for utxo in decode_outputs(&value)? {
                if accumulated >= amount {
                    break 'scan;
                }
                if utxo.output.is_locked_with_key(pubkey_hash) {
                    accumulated += utxo.output.value;
                    outpoints.push(OutPoint::new(txid, utxo.vout));
                }
            }
        }

        Ok((accumulated, outpoints))
    }

    /// Whether the index still lists `outpoint` as unspent
    pub fn is_unspent(&self, outpoint: &OutPoint) -> Result<bool> {
        match self.chainstate.get(outpoint.txid.as_bytes().as_slice())? {
            Some(raw) => Ok(decode_outputs(&raw)?
                .iter()
                .any(|u| u.vout == outpoint.vout)),
            None => Ok(false),
        }
    }

    /// All unspent outputs locked to `pubkey_hash`
    pub fn find_utxo(&self, pubkey_hash: &PubKeyHash) -> Result<Vec<TxOutput>> {
        let mut outputs = Vec::new();

        for item in self.chainstate.iter() {
            let (_, value) = item?;
            outputs.extend(
                decode_outputs(&value)?
                    .into_iter()
                    .map(|u| u.output)
                    .filter(|o| o.is_locked_with_key(pubkey_hash)),
            );
        }

        Ok(outputs)
    }

    pub fn balance(&self, pubkey_hash: &PubKeyHash) -> Result<u64> {
        Ok(self.find_utxo(pubkey_hash)?.iter().map(|o| o.value).sum())
    }

    /// Number of transactions with at least one unspent output
    pub fn count_transactions(&self) -> usize {
        self.chainstate.len()
    }
}
