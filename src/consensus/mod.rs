// Consensus: proof of work with a fixed difficulty

pub mod pow;

pub use pow::{Miner, MiningResult, PowError, leading_zero_bits, target_for};
