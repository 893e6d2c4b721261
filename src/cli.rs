// CLI commands

use crate::config::{DEFAULT_DIFFICULTY, DEFAULT_SEED_NODE, GENESIS_COINBASE_DATA, NodeConfig};
use crate::consensus::Miner;
use crate::network::{NetworkError, Node, submit_transaction};
use crate::storage::{ChainError, Storage};
use crate::wallet::{Address, TransactionBuilder, WalletError, Wallets, new_coinbase_tx};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Parser)]
#[command(name = "utxo-ledger")]
#[command(about = "Proof-of-work UTXO ledger with a peer-to-peer node", long_about = None)]
pub struct Cli {
    /// Node id; the node listens on localhost:<id> and keeps its files apart by id
    #[arg(long, env = "NODE_ID", default_value_t = 3000, global = true)]
    pub node_id: u16,

    /// Directory for the database and wallet files
    #[arg(long, default_value = "./data", global = true)]
    pub data_dir: PathBuf,

    /// Leading zero bits required of block hashes
    #[arg(long, default_value_t = DEFAULT_DIFFICULTY, global = true)]
    pub difficulty: u32,

    /// Known peers, seed node first
    #[arg(long = "seed", global = true)]
    pub seeds: Vec<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a new key pair and save it into the wallet file
    #[command(name = "createwallet")]
    CreateWallet,

    /// List all addresses from the wallet file
    #[command(name = "listaddresses")]
    ListAddresses,

    /// Create a blockchain and send the genesis reward to an address
    #[command(name = "createblockchain")]
    CreateBlockchain {
        #[arg(long)]
        address: String,
    },

    /// Get balance of an address
    #[command(name = "getbalance")]
    GetBalance {
        #[arg(long)]
        address: String,
    },

    /// Send an amount of coins from one address to another
    Send {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        amount: u64,
        /// Mine the transaction on this node instead of submitting it to the seed node
        #[arg(long)]
        mine: bool,
    },

    /// Print all the blocks of the blockchain
    #[command(name = "printchain")]
    PrintChain,

    /// Rebuild the UTXO set
    #[command(name = "reindexutxo")]
    ReindexUtxo,

    /// Start a node; with --miner, mine pending transactions
    #[command(name = "startnode")]
    StartNode {
        /// Address to receive mining rewards
        #[arg(long)]
        miner: Option<String>,
    },
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("failed to start async runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CliError>;

/// CLI handler
pub struct CliHandler {
    node_id: u16,
    data_dir: PathBuf,
    difficulty: u32,
    seeds: Vec<String>,
}

impl CliHandler {
    pub fn new(cli: &Cli) -> Self {
        Self {
            node_id: cli.node_id,
            data_dir: cli.data_dir.clone(),
            difficulty: cli.difficulty,
            seeds: cli.seeds.clone(),
        }
    }

    fn db_path(&self) -> PathBuf {
        self.data_dir.join(format!("blockchain_{}", self.node_id))
    }

    fn wallet_path(&self) -> PathBuf {
        self.data_dir.join(format!("wallet_{}.json", self.node_id))
    }

    fn miner(&self) -> Miner {
        Miner::new(self.difficulty)
    }

    fn open_storage(&self) -> Result<Storage> {
        Ok(Storage::open(self.db_path(), self.miner())?)
    }

    fn node_config(&self) -> NodeConfig {
        let seeds = if self.seeds.is_empty() {
            vec![DEFAULT_SEED_NODE.to_string()]
        } else {
            self.seeds.clone()
        };

        NodeConfig::for_node_id(self.node_id)
            .with_seed_nodes(seeds)
            .with_difficulty(self.difficulty)
    }

    /// Handle CLI command
    pub fn handle(&self, command: Commands) -> Result<()> {
        match command {
            Commands::CreateWallet => self.create_wallet(),
            Commands::ListAddresses => self.list_addresses(),
            Commands::CreateBlockchain { address } => self.create_blockchain(&address),
            Commands::GetBalance { address } => self.get_balance(&address),
            Commands::Send {
                from,
                to,
                amount,
                mine,
            } => self.send(&from, &to, amount, mine),
            Commands::PrintChain => self.print_chain(),
            Commands::ReindexUtxo => self.reindex_utxo(),
            Commands::StartNode { miner } => self.start_node(miner),
        }
    }

    fn create_wallet(&self) -> Result<()> {
        let mut wallets = Wallets::load_or_default(self.wallet_path())?;
        let address = wallets.create_wallet();
        wallets.save(self.wallet_path())?;

        println!("Your new address: {}", address);
        Ok(())
    }

    fn list_addresses(&self) -> Result<()> {
        let wallets = Wallets::load_or_default(self.wallet_path())?;
        for address in wallets.list_addresses() {
            println!("{}", address);
        }
        Ok(())
    }

    fn create_blockchain(&self, address: &str) -> Result<()> {
        let address = Address::parse(address)?;
        let genesis = new_coinbase_tx(&address, Some(GENESIS_COINBASE_DATA.as_bytes().to_vec()))?;
        let storage = Storage::create(self.db_path(), genesis, self.miner())?;

        println!("Genesis block: {}", storage.blockchain.tip_hash()?);
        println!("Done!");
        Ok(())
    }

    fn get_balance(&self, address: &str) -> Result<()> {
        let address = Address::parse(address)?;
        let storage = self.open_storage()?;
        let balance = storage.utxo_set.balance(&address.to_pubkey_hash()?)?;

        println!("Balance of '{}': {}", address, balance);
        Ok(())
    }

    fn send(&self, from: &str, to: &str, amount: u64, mine: bool) -> Result<()> {
        let from = Address::parse(from)?;
        let to = Address::parse(to)?;

        let storage = self.open_storage()?;
        let wallets = Wallets::load_or_default(self.wallet_path())?;
        let tx = TransactionBuilder::new(&wallets, &storage).build(&from, &to, amount)?;

        if mine {
            let coinbase = new_coinbase_tx(&from, None)?;
            let block = storage.blockchain.mine_block(vec![tx, coinbase])?;
            storage.utxo_set.update(&block)?;
        } else {
            let config = self.node_config();
            let seed = config.seed_node().unwrap_or(DEFAULT_SEED_NODE);

            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(submit_transaction(
                seed,
                &config.node_address,
                tx,
                config.io_timeout,
            ))?;
        }

        println!("Success!");
        Ok(())
    }

    fn print_chain(&self) -> Result<()> {
        let storage = self.open_storage()?;
        let chain = &storage.blockchain;

        for block in chain.iter()? {
            let block = block?;

            println!("============ Block {} ============", block.hash);
            println!("Height: {}", block.height);
            println!("Prev. block: {}", block.prev_hash);
            println!("PoW: {}", chain.validate_block(&block));
            for tx in &block.transactions {
                println!("{}", tx);
            }
            println!();
        }

        Ok(())
    }

    fn reindex_utxo(&self) -> Result<()> {
        let storage = self.open_storage()?;
        storage.reindex()?;

        println!(
            "Done! There are {} transactions in the UTXO set.",
            storage.utxo_set.count_transactions()
        );
        Ok(())
    }

    fn start_node(&self, miner: Option<String>) -> Result<()> {
        println!("Starting node {}", self.node_id);

        let config = self.node_config().with_mining_address(miner);
        let node = Node::new(config, self.open_storage()?)?;

        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(node.run())?;
        Ok(())
    }
}
