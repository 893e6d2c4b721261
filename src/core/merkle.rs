// Merkle tree committing a block's transactions to one root

use crate::core::{Hash256, Serializable, Transaction, sha256, sha256_concat};

/// A node owns its children; nothing points back up the tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerkleNode {
    pub left: Option<Box<MerkleNode>>,
    pub right: Option<Box<MerkleNode>>,
    pub data: Hash256,
}

impl MerkleNode {
    /// Leaf node: SHA256 of the raw data
    pub fn leaf(data: &[u8]) -> Self {
        Self {
            left: None,
            right: None,
            data: sha256(data),
        }
    }

    /// Internal node: SHA256(left ‖ right)
    pub fn branch(left: MerkleNode, right: MerkleNode) -> Self {
        let data = sha256_concat(left.data.as_bytes(), right.data.as_bytes());
        Self {
            left: Some(Box::new(left)),
            right: Some(Box::new(right)),
            data,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    pub root: MerkleNode,
}

impl MerkleTree {
    /// Build the tree bottom-up, level by level.
    /// Any level with an odd node count has its last node duplicated,
    /// so a single leaf still gets hashed with itself.
    /// Returns `None` for empty input.
    pub fn new(leaves: &[Vec<u8>]) -> Option<Self> {
        let mut level: Vec<MerkleNode> = leaves.iter().map(|data| MerkleNode::leaf(data)).collect();
        if level.is_empty() {
            return None;
        }

        loop {
            if level.len() % 2 == 1 {
                let last = level[level.len() - 1].clone();
                level.push(last);
            }

            let mut next_level = Vec::with_capacity(level.len() / 2);
            let mut nodes = level.into_iter();
            while let (Some(left), Some(right)) = (nodes.next(), nodes.next()) {
                next_level.push(MerkleNode::branch(left, right));
            }

            if next_level.len() == 1 {
                return next_level.pop().map(|root| Self { root });
            }
            level = next_level;
        }
    }

    pub fn root_hash(&self) -> Hash256 {
        self.root.data
    }
}

/// Merkle root over serialized transactions in block order.
/// An empty transaction list commits to the zero hash.
pub fn merkle_root(transactions: &[Transaction]) -> Hash256 {
    let leaves: Vec<Vec<u8>> = transactions.iter().map(|tx| tx.serialize()).collect();
    MerkleTree::new(&leaves)
        .map(|tree| tree.root_hash())
        .unwrap_or_else(Hash256::zero)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(tag: u8) -> Transaction {
        Transaction::coinbase([tag; 20], 10, vec![tag])
    }

    fn leaf(tx: &Transaction) -> Hash256 {
        sha256(&tx.serialize())
    }

    fn pair(a: Hash256, b: Hash256) -> Hash256 {
        sha256_concat(a.as_bytes(), b.as_bytes())
    }

    #[test]
    fn test_merkle_root_single_tx() {
        let tx1 = tx(1);
        let l = leaf(&tx1);
        assert_eq!(merkle_root(&[tx1]), pair(l, l));
    }

    #[test]
    fn test_merkle_root_two_tx() {
        let (tx1, tx2) = (tx(1), tx(2));
        let expected = pair(leaf(&tx1), leaf(&tx2));
        assert_eq!(merkle_root(&[tx1, tx2]), expected);
    }

    #[test]
    fn test_merkle_root_three_tx_duplicates_last() {
        let txs = [tx(1), tx(2), tx(3)];
        let (a, b, c) = (leaf(&txs[0]), leaf(&txs[1]), leaf(&txs[2]));
        let expected = pair(pair(a, b), pair(c, c));
        assert_eq!(merkle_root(&txs), expected);
    }

    #[test]
    fn test_merkle_root_order_matters() {
        let (tx1, tx2) = (tx(1), tx(2));
        assert_ne!(
            merkle_root(&[tx1.clone(), tx2.clone()]),
            merkle_root(&[tx2, tx1])
        );
    }

    #[test]
    fn test_tree_structure() {
        let leaves = vec![b"a".to_vec(), b"b".to_vec()];
        let tree = MerkleTree::new(&leaves).unwrap();

        let left = tree.root.left.as_ref().unwrap();
        let right = tree.root.right.as_ref().unwrap();
        assert_eq!(left.data, sha256(b"a"));
        assert_eq!(right.data, sha256(b"b"));
        assert!(left.left.is_none());
    }

    #[test]
    fn test_empty_tree() {
        assert!(MerkleTree::new(&[]).is_none());
        assert_eq!(merkle_root(&[]), Hash256::zero());
    }
}
