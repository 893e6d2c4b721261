// Block data structures

use super::serialize::{ensure_consumed, read_hash, read_i64, read_u64, read_varint, write_varint};
use crate::core::{CodecError, Hash256, Serializable, Transaction, merkle_root, sha256};
use std::io::{Cursor, Write};

/// Everything the proof-of-work hash commits to, apart from the nonce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    /// Hash of the previous block (zero for genesis)
    pub prev_hash: Hash256,
    /// Merkle root of all transactions in the block
    pub merkle_root: Hash256,
    /// Block timestamp (Unix epoch seconds)
    pub timestamp: i64,
    /// Difficulty in leading zero bits
    pub bits: u32,
}

impl BlockHeader {
    pub fn new(prev_hash: Hash256, merkle_root: Hash256, timestamp: i64, bits: u32) -> Self {
        Self {
            prev_hash,
            merkle_root,
            timestamp,
            bits,
        }
    }

    /// `prev_hash ‖ merkle_root ‖ timestamp ‖ bits ‖ nonce`, integers big-endian
    pub fn bytes_with_nonce(&self, nonce: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(84);
        buf.write_all(self.prev_hash.as_bytes()).unwrap();
        buf.write_all(self.merkle_root.as_bytes()).unwrap();
        buf.write_all(&self.timestamp.to_be_bytes()).unwrap();
        buf.write_all(&self.bits.to_be_bytes()).unwrap();
        buf.write_all(&nonce.to_be_bytes()).unwrap();
        buf
    }

    /// Calculate the block hash for a given nonce
    pub fn hash_with_nonce(&self, nonce: u64) -> Hash256 {
        sha256(&self.bytes_with_nonce(nonce))
    }
}

/// Block - created once at mining time, immutable afterwards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub prev_hash: Hash256,
    pub hash: Hash256,
    pub nonce: u64,
    pub height: u64,
}

impl Block {
    /// Merkle root of this block's transactions
    pub fn hash_transactions(&self) -> Hash256 {
        merkle_root(&self.transactions)
    }

    /// Rebuild the header that `hash` was mined over
    pub fn header(&self, bits: u32) -> BlockHeader {
        BlockHeader::new(self.prev_hash, self.hash_transactions(), self.timestamp, bits)
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_zero()
    }

    /// Find a transaction in this block by id
    pub fn find_transaction(&self, id: &Hash256) -> Option<&Transaction> {
        self.transactions.iter().find(|tx| tx.id == *id)
    }
}

impl Serializable for Block {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.write_all(&self.timestamp.to_le_bytes()).unwrap();
        buf.write_all(self.prev_hash.as_bytes()).unwrap();
        buf.write_all(self.hash.as_bytes()).unwrap();
        buf.write_all(&self.nonce.to_le_bytes()).unwrap();
        buf.write_all(&self.height.to_le_bytes()).unwrap();

        write_varint(&mut buf, self.transactions.len() as u64).unwrap();
        for tx in &self.transactions {
            buf.write_all(&tx.serialize()).unwrap();
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(data);

        let timestamp = read_i64(&mut cursor)?;
        let prev_hash = read_hash(&mut cursor)?;
        let hash = read_hash(&mut cursor)?;
        let nonce = read_u64(&mut cursor)?;
        let height = read_u64(&mut cursor)?;

        let tx_count = read_varint(&mut cursor)? as usize;
        let mut transactions = Vec::new();
        for _ in 0..tx_count {
            transactions.push(Transaction::from_reader(&mut cursor)?);
        }

        ensure_consumed(&cursor)?;

        Ok(Self {
            timestamp,
            transactions,
            prev_hash,
            hash,
            nonce,
            height,
        })
    }
}
