// Pending transactions waiting to be mined

use crate::core::{Block, Hash256, Transaction};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Mempool {
    transactions: HashMap<Hash256, Transaction>,
}

impl Mempool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a transaction; returns false if it was already pending
    pub fn insert(&mut self, tx: Transaction) -> bool {
        if self.transactions.contains_key(&tx.id) {
            return false;
        }
        self.transactions.insert(tx.id, tx);
        true
    }

    pub fn contains(&self, id: &Hash256) -> bool {
        self.transactions.contains_key(id)
    }

    pub fn get(&self, id: &Hash256) -> Option<&Transaction> {
        self.transactions.get(id)
    }

    pub fn remove(&mut self, id: &Hash256) -> Option<Transaction> {
        self.transactions.remove(id)
    }

    /// Drop every pending transaction that `block` confirmed
    pub fn remove_included(&mut self, block: &Block) {
        for tx in &block.transactions {
            self.transactions.remove(&tx.id);
        }
    }

    /// Copy of all pending transactions
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
