// Proof of Work implementation

use crate::config::MAX_NONCE;
use crate::core::{Block, BlockHeader, Hash256, Transaction};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PowError {
    #[error("no nonce up to {max_nonce} satisfies difficulty {difficulty}")]
    ExhaustedSearchSpace { difficulty: u32, max_nonce: u64 },
}

pub type Result<T> = std::result::Result<T, PowError>;

/// Target for `difficulty` leading zero bits: 2^(256 - difficulty) as a
/// big-endian integer. Difficulty 0 has no 256-bit representation and
/// accepts every hash, so callers must special-case it.
pub fn target_for(difficulty: u32) -> [u8; 32] {
    let mut target = [0u8; 32];
    if difficulty == 0 {
        return [0xff; 32];
    }

    let exponent = 256 - difficulty.min(256) as usize;
    target[31 - exponent / 8] = 1 << (exponent % 8);
    target
}

/// Count leading zero bits of a hash read as a big-endian integer
pub fn leading_zero_bits(hash: &Hash256) -> u32 {
    let mut zeros = 0;

    for byte in hash.as_bytes() {
        if *byte == 0 {
            zeros += 8;
        } else {
            zeros += byte.leading_zeros();
            break;
        }
    }

    zeros
}

/// Proof of Work miner
#[derive(Debug, Clone)]
pub struct Miner {
    /// Fixed for the whole chain, no retargeting
    difficulty: u32,
    max_nonce: u64,
    /// Cached target for fast comparison
    target: [u8; 32],
}

impl Miner {
    /// Create a new miner with fixed difficulty
    pub fn new(difficulty: u32) -> Self {
        Self {
            difficulty,
            max_nonce: MAX_NONCE,
            target: target_for(difficulty),
        }
    }

    /// Stop searching after `max_nonce`
    pub fn with_max_nonce(mut self, max_nonce: u64) -> Self {
        self.max_nonce = max_nonce;
        self
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    /// hash < 2^(256 - difficulty), comparing big-endian
    #[inline]
    pub fn meets_target(&self, hash: &Hash256) -> bool {
        self.difficulty == 0 || hash.as_bytes() < &self.target
    }

    /// Search nonces from 0 upward until the header hash meets the target
    pub fn mine(&self, header: &BlockHeader) -> Result<MiningResult> {
        let start_time = Instant::now();
        let mut attempts = 0u64;

        for nonce in 0..=self.max_nonce {
            let hash = header.hash_with_nonce(nonce);
            attempts += 1;

            if self.meets_target(&hash) {
                return Ok(MiningResult {
                    nonce,
                    hash,
                    attempts,
                    duration: start_time.elapsed(),
                });
            }

            if attempts % 100_000 == 0 {
                let elapsed = start_time.elapsed();
                log::debug!(
                    "Mining attempts: {} ({:.1} KH/s)",
                    attempts,
                    attempts as f64 / elapsed.as_secs_f64() / 1000.0
                );
            }
        }

        Err(PowError::ExhaustedSearchSpace {
            difficulty: self.difficulty,
            max_nonce: self.max_nonce,
        })
    }

    /// Recompute the hash from the block's stored fields and check it
    pub fn validate(&self, block: &Block) -> bool {
        let hash = block.header(self.difficulty).hash_with_nonce(block.nonce);
        hash == block.hash && self.meets_target(&hash)
    }

    /// Assemble a block on top of `prev_hash` and run proof of work over it
    pub fn mine_block(
        &self,
        transactions: Vec<Transaction>,
        prev_hash: Hash256,
        height: u64,
    ) -> Result<Block> {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        let mut block = Block {
            timestamp,
            transactions,
            prev_hash,
            hash: Hash256::zero(),
            nonce: 0,
            height,
        };

        let result = self.mine(&block.header(self.difficulty))?;
        log::info!(
            "Mined block {} at height {} after {} attempts ({:.1} H/s)",
            result.hash,
            height,
            result.attempts,
            result.hash_rate()
        );

        block.nonce = result.nonce;
        block.hash = result.hash;
        Ok(block)
    }
}

/// Mining result
#[derive(Debug)]
pub struct MiningResult {
    /// The nonce that was found
    pub nonce: u64,
    /// The resulting hash
    pub hash: Hash256,
    /// Number of attempts
    pub attempts: u64,
    /// Time taken
    pub duration: Duration,
}

impl MiningResult {
    /// Calculate hash rate (hashes per second)
    pub fn hash_rate(&self) -> f64 {
        self.attempts as f64 / self.duration.as_secs_f64().max(f64::EPSILON)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_DIFFICULTY: u32 = 8;

    fn sample_transactions() -> Vec<Transaction> {
        vec![Transaction::coinbase([5u8; 20], 10, b"pow test".to_vec())]
    }

    #[test]
    fn test_target_conversion() {
        let target = target_for(8);
        assert_eq!(target[0], 1);
        assert!(target[1..].iter().all(|b| *b == 0));

        let target = target_for(12);
        assert_eq!(target[0], 0);
        assert_eq!(target[1], 0x10);

        let target = target_for(256);
        assert_eq!(target[31], 1);
        assert!(target[..31].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_target_validation() {
        let miner = Miner::new(TEST_DIFFICULTY);

        // Zero hash is the lowest possible
        assert!(miner.meets_target(&Hash256::zero()));
        assert!(!miner.meets_target(&Hash256::new([0xff; 32])));

        // Exactly the target is not below it
        assert!(!miner.meets_target(&Hash256::new(target_for(TEST_DIFFICULTY))));
    }

    #[test]
    fn test_zero_difficulty_accepts_anything() {
        let miner = Miner::new(0);
        assert!(miner.meets_target(&Hash256::new([0xff; 32])));
    }

    #[test]
    fn test_leading_zeros() {
        assert_eq!(leading_zero_bits(&Hash256::zero()), 256);
        assert_eq!(leading_zero_bits(&Hash256::new([0xff; 32])), 0);

        let mut bytes = [0u8; 32];
        bytes[1] = 0x10;
        assert_eq!(leading_zero_bits(&Hash256::new(bytes)), 11);
    }

    #[test]
    fn test_pow_mining_easy() {
        let miner = Miner::new(TEST_DIFFICULTY);
        let block = miner
            .mine_block(sample_transactions(), Hash256::zero(), 0)
            .unwrap();

        assert!(miner.validate(&block));
        assert!(leading_zero_bits(&block.hash) >= TEST_DIFFICULTY);
    }

    #[test]
    fn test_tampered_block_fails_validation() {
        let miner = Miner::new(TEST_DIFFICULTY);
        let block = miner
            .mine_block(sample_transactions(), Hash256::zero(), 0)
            .unwrap();

        let mut nonce_changed = block.clone();
        nonce_changed.nonce += 1;
        assert!(!miner.validate(&nonce_changed));

        let mut tx_changed = block.clone();
        tx_changed.transactions[0].outputs[0].value = 1_000;
        assert!(!miner.validate(&tx_changed));

        let mut timestamp_changed = block;
        timestamp_changed.timestamp += 1;
        assert!(!miner.validate(&timestamp_changed));
    }

    #[test]
    fn test_exhausted_search_space() {
        let miner = Miner::new(255).with_max_nonce(10);
        let header = BlockHeader::new(Hash256::zero(), Hash256::zero(), 0, 255);

        let result = miner.mine(&header);
        assert_eq!(
            result.unwrap_err(),
            PowError::ExhaustedSearchSpace {
                difficulty: 255,
                max_nonce: 10
            }
        );
    }
}
