// Core ledger data structures

mod base58;
mod block;
mod error;
mod hash;
mod merkle;
mod serialize;
mod transaction;
mod types;

pub use base58::*;
pub use block::*;
pub use error::*;
pub use hash::*;
pub use merkle::*;
pub use serialize::*;
pub use transaction::*;
pub use types::*;
