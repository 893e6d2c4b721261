// Protocol constants and per-node configuration

use std::time::Duration;

/// Protocol version announced in `version` messages
pub const NODE_VERSION: u32 = 1;

/// Width of the zero-padded command field at the start of every message
pub const COMMAND_LENGTH: usize = 12;

/// Coinbase reward per block
pub const SUBSIDY: u64 = 10;

/// Leading zero bits required of every block hash
pub const DEFAULT_DIFFICULTY: u32 = 16;

/// Largest nonce tried before mining gives up (max signed 64-bit integer)
pub const MAX_NONCE: u64 = i64::MAX as u64;

/// Pending transactions a miner waits for before assembling a block
pub const MINING_THRESHOLD: usize = 2;

pub const GENESIS_COINBASE_DATA: &str =
    "The Times 03/Jan/2009 Chancellor on brink of second bailout for banks";

/// Upper bound on one inbound message
pub const MAX_MESSAGE_SIZE: u64 = 32 * 1024 * 1024;

pub const DEFAULT_SEED_NODE: &str = "localhost:3000";

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for one running node
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Address this node listens on and announces to peers
    pub node_address: String,
    /// Known peers at startup. The first entry is the seed node.
    pub seed_nodes: Vec<String>,
    /// Where coinbase rewards go; `None` means this node never mines
    pub mining_address: Option<String>,
    pub difficulty: u32,
    /// Bound on connect, read and write of a single peer exchange
    pub io_timeout: Duration,
}

impl NodeConfig {
    /// Node listening on `localhost:<node_id>`
    pub fn for_node_id(node_id: u16) -> Self {
        Self {
            node_address: format!("localhost:{}", node_id),
            ..Self::default()
        }
    }

    pub fn with_address(mut self, node_address: impl Into<String>) -> Self {
        self.node_address = node_address.into();
        self
    }

    pub fn with_seed_nodes(mut self, seed_nodes: Vec<String>) -> Self {
        self.seed_nodes = seed_nodes;
        self
    }

    pub fn with_mining_address(mut self, mining_address: Option<String>) -> Self {
        self.mining_address = mining_address;
        self
    }

    pub fn with_difficulty(mut self, difficulty: u32) -> Self {
        self.difficulty = difficulty;
        self
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// The seed node, if any peers are configured
    pub fn seed_node(&self) -> Option<&str> {
        self.seed_nodes.first().map(String::as_str)
    }

    pub fn is_seed(&self) -> bool {
        self.seed_node() == Some(self.node_address.as_str())
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_address: DEFAULT_SEED_NODE.to_string(),
            seed_nodes: vec![DEFAULT_SEED_NODE.to_string()],
            mining_address: None,
            difficulty: DEFAULT_DIFFICULTY,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_detection() {
        let seed = NodeConfig::for_node_id(3000);
        assert!(seed.is_seed());

        let other = NodeConfig::for_node_id(3001);
        assert!(!other.is_seed());
        assert_eq!(other.seed_node(), Some(DEFAULT_SEED_NODE));
    }

    #[test]
    fn test_builder() {
        let config = NodeConfig::for_node_id(3001)
            .with_seed_nodes(vec!["127.0.0.1:4000".to_string()])
            .with_mining_address(Some("addr".to_string()))
            .with_difficulty(8);

        assert_eq!(config.node_address, "localhost:3001");
        assert_eq!(config.seed_node(), Some("127.0.0.1:4000"));
        assert_eq!(config.mining_address.as_deref(), Some("addr"));
        assert_eq!(config.difficulty, 8);
    }
}
