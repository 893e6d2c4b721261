// Network node - one-shot peer exchanges, block sync and mining

use super::error::Result;
use super::mempool::Mempool;
use super::message::{GetDataMessage, InvMessage, InvType, Message, VersionMessage};
use super::peer::{PeerRegistry, read_request, send_data};
use crate::config::{MINING_THRESHOLD, NODE_VERSION, NodeConfig};
use crate::core::{Block, Hash256, Transaction};
use crate::storage::{BlockStatus, ChainError, OutPoint, Storage};
use crate::wallet::{Address, new_coinbase_tx};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, RwLock};

/// Download progress of an `inv(block)` announcement
#[derive(Debug, Default)]
struct SyncState {
    /// Announced blocks not requested yet, per announcing peer, in announcement order
    in_transit: HashMap<String, VecDeque<Hash256>>,
    /// A block replaced the tip without extending it; rebuild the UTXO set
    /// once the download finishes
    needs_reindex: bool,
}

/// Network node
#[derive(Clone)]
pub struct Node {
    config: Arc<NodeConfig>,
    mining_address: Option<Address>,
    /// Known peers
    pub peers: Arc<RwLock<PeerRegistry>>,
    /// Storage
    pub storage: Arc<RwLock<Storage>>,
    pub mempool: Arc<Mutex<Mempool>>,
    sync: Arc<Mutex<SyncState>>,
    /// Held for a whole mining run so only one runs at a time
    mining: Arc<Mutex<()>>,
}

impl Node {
    /// Create a new node
    pub fn new(config: NodeConfig, storage: Storage) -> Result<Self> {
        let mining_address = config
            .mining_address
            .as_deref()
            .map(Address::parse)
            .transpose()?;

        Ok(Self {
            peers: Arc::new(RwLock::new(PeerRegistry::new(config.seed_nodes.clone()))),
            config: Arc::new(config),
            mining_address,
            storage: Arc::new(RwLock::new(storage)),
            mempool: Arc::new(Mutex::new(Mempool::new())),
            sync: Arc::new(Mutex::new(SyncState::default())),
            mining: Arc::new(Mutex::new(())),
        })
    }

    pub fn address(&self) -> &str {
        &self.config.node_address
    }

    pub async fn best_height(&self) -> Result<u64> {
        Ok(self.storage.read().await.blockchain.get_best_height()?)
    }

    pub async fn known_peers(&self) -> Vec<String> {
        self.peers.read().await.list()
    }

    /// Bind the configured address and serve until the listener fails
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.node_address).await?;
        self.serve(listener).await
    }

    /// Announce ourselves to the seed node, then accept connections forever.
    /// Each connection is handled on its own task.
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        log::info!("Node listening on {}", self.config.node_address);
        if let Some(address) = &self.mining_address {
            log::info!("Mining is on. Address to receive rewards: {}", address);
        }

        if let Some(seed) = self.config.seed_node() {
            if !self.config.is_seed() {
                self.send_version(seed).await?;
            }
        }

        loop {
            let (stream, addr) = listener.accept().await?;
            let node = self.clone();

            tokio::spawn(async move {
                if let Err(e) = node.handle_connection(stream, addr).await {
                    log::error!("Peer {} error: {}", addr, e);
                }
            });
        }
    }

    /// Read one message, dispatch it, close the connection
    async fn handle_connection(&self, mut stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let data = read_request(&mut stream, self.config.io_timeout).await?;
        drop(stream);

        let message = Message::deserialize(&data)?;
        let peer = addr.to_string();
        log::info!(
            "Received {} command from {}",
            message.message_type().as_str(),
            message.addr_from().unwrap_or(peer.as_str())
        );

        match message {
            Message::Version(version) => self.handle_version(version).await,
            Message::GetBlocks { addr_from } => self.handle_get_blocks(&addr_from).await,
            Message::Inv(inv) => self.handle_inv(inv).await,
            Message::GetData(get) => self.handle_get_data(get).await,
            Message::Block { addr_from, block } => self.handle_block(&addr_from, block).await,
            Message::Tx {
                addr_from,
                transaction,
            } => self.handle_tx(&addr_from, transaction).await,
            Message::Addr { addr_list } => self.handle_addr(addr_list).await,
        }
    }

    async fn handle_version(&self, version: VersionMessage) -> Result<()> {
        let my_height = self.best_height().await?;

        if my_height < version.best_height {
            self.send_get_blocks(&version.addr_from).await;
        } else if my_height > version.best_height {
            self.send_version(&version.addr_from).await?;
        }

        if self.peers.write().await.add(version.addr_from.clone()) {
            log::info!("Registered peer {}", version.addr_from);
        }
        Ok(())
    }

    async fn handle_get_blocks(&self, addr_from: &str) -> Result<()> {
        let hashes = self.storage.read().await.blockchain.get_block_hashes()?;
        self.send_inv(addr_from, InvType::Block, hashes).await;
        Ok(())
    }

    async fn handle_inv(&self, inv: InvMessage) -> Result<()> {
        log::info!(
            "Received inventory with {} {:?} items",
            inv.items.len(),
            inv.inv_type
        );

        match inv.inv_type {
            InvType::Block => {
                let missing = {
                    let storage = self.storage.read().await;
                    let mut missing = VecDeque::new();
                    for hash in inv.items {
                        if !storage.blockchain.has_block(&hash)? {
                            missing.push_back(hash);
                        }
                    }
                    missing
                };

                let mut missing = missing.into_iter();
                let Some(first) = missing.next() else {
                    return Ok(());
                };
                self.sync
                    .lock()
                    .await
                    .in_transit
                    .insert(inv.addr_from.clone(), missing.collect());
                self.send_get_data(&inv.addr_from, InvType::Block, first)
                    .await;
            }
            InvType::Tx => {
                let Some(id) = inv.items.first().copied() else {
                    return Ok(());
                };
                if !self.mempool.lock().await.contains(&id) {
                    self.send_get_data(&inv.addr_from, InvType::Tx, id).await;
                }
            }
        }

        Ok(())
    }

    async fn handle_get_data(&self, get: GetDataMessage) -> Result<()> {
        match get.inv_type {
            InvType::Block => {
                let block = self.storage.read().await.blockchain.get_block(&get.id)?;
                self.send_block(&get.addr_from, block).await;
            }
            InvType::Tx => {
                let tx = self.mempool.lock().await.get(&get.id).cloned();
                match tx {
                    Some(tx) => self.send_tx(&get.addr_from, tx).await,
                    None => log::debug!("Requested transaction {} is not pending", get.id),
                }
            }
        }

        Ok(())
    }

    async fn handle_block(&self, addr_from: &str, block: Block) -> Result<()> {
        let hash = block.hash;

        {
            let storage = self.storage.write().await;
            let status = match storage.blockchain.add_block(&block) {
                Ok(status) => status,
                Err(ChainError::InvalidBlock(_)) => {
                    log::warn!("Rejected block {} from {}: invalid proof of work", hash, addr_from);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            let mut sync = self.sync.lock().await;
            match status {
                BlockStatus::Extended if !sync.needs_reindex => storage.utxo_set.update(&block)?,
                BlockStatus::NewTip => sync.needs_reindex = true,
                _ => {}
            }
            log::info!("Added block {} ({:?})", hash, status);
        }

        self.mempool.lock().await.remove_included(&block);

        let next = {
            let mut sync = self.sync.lock().await;
            let next = sync
                .in_transit
                .get_mut(addr_from)
                .and_then(VecDeque::pop_front);
            if next.is_none() {
                sync.in_transit.remove(addr_from);
            }
            next
        };
        match next {
            Some(next) => self.send_get_data(addr_from, InvType::Block, next).await,
            None => self.finish_sync(addr_from).await?,
        }

        Ok(())
    }

    /// Rebuild the UTXO set if a download moved the tip off the indexed chain.
    /// If the new tip's ancestors are still missing, ask `addr_from` for them
    /// and leave the rebuild for when they arrive.
    async fn finish_sync(&self, addr_from: &str) -> Result<()> {
        let missing = {
            let storage = self.storage.write().await;
            let mut sync = self.sync.lock().await;
            if !sync.needs_reindex {
                return Ok(());
            }

            match storage.reindex() {
                Ok(()) => {
                    sync.needs_reindex = false;
                    None
                }
                Err(ChainError::BlockNotFound(hash)) => Some(hash),
                Err(e) => return Err(e.into()),
            }
        };

        if let Some(hash) = missing {
            log::warn!(
                "Chain is missing block {}, requesting blocks from {}",
                hash,
                addr_from
            );
            self.send_get_blocks(addr_from).await;
        }
        Ok(())
    }

    async fn handle_tx(&self, addr_from: &str, tx: Transaction) -> Result<()> {
        let id = tx.id;
        let pending = {
            let mut mempool = self.mempool.lock().await;
            if !mempool.insert(tx) {
                return Ok(());
            }
            mempool.len()
        };
        log::info!("Transaction {} added to mempool ({} pending)", id, pending);

        if self.config.is_seed() {
            let peers = self
                .peers
                .read()
                .await
                .others(&[self.address(), addr_from]);
            for peer in peers {
                self.send_inv(&peer, InvType::Tx, vec![id]).await;
            }
        } else if self.mining_address.is_some() && pending >= MINING_THRESHOLD {
            self.mine_pending().await?;
        }

        Ok(())
    }

    async fn handle_addr(&self, addr_list: Vec<String>) -> Result<()> {
        let peers = {
            let mut peers = self.peers.write().await;
            for addr in addr_list {
                if addr != self.address() {
                    peers.add(addr);
                }
            }
            log::info!("There are {} known nodes now", peers.len());
            peers.others(&[self.address()])
        };

        for peer in peers {
            self.send_get_blocks(&peer).await;
        }
        Ok(())
    }

    /// Mine blocks from the mempool until it is empty or holds nothing valid
    async fn mine_pending(&self) -> Result<()> {
        let Some(mining_address) = self.mining_address.clone() else {
            return Ok(());
        };
        let _mining = self.mining.lock().await;

        loop {
            let candidates = self.mempool.lock().await.snapshot();
            if candidates.is_empty() {
                break;
            }

            let transactions = self.select_for_block(candidates).await?;
            if transactions.is_empty() {
                log::info!("All transactions are invalid! Waiting for new ones...");
                break;
            }

            let selected: Vec<Hash256> = transactions.iter().map(|tx| tx.id).collect();
            let coinbase = new_coinbase_tx(&mining_address, None)?;

            let storage = self.storage.clone();
            let mined = tokio::task::spawn_blocking(move || {
                let storage = storage.blocking_write();
                mine_unspent(&storage, transactions, coinbase)
            })
            .await??;

            // Selected transactions are either in the block or spent elsewhere
            {
                let mut mempool = self.mempool.lock().await;
                for id in &selected {
                    mempool.remove(id);
                }
            }

            let Some(block) = mined else {
                log::info!("Selected transactions were spent by a newer block, nothing mined");
                continue;
            };
            log::info!("New block {} is mined", block.hash);

            let peers = self.peers.read().await.others(&[self.address()]);
            for peer in peers {
                self.send_inv(&peer, InvType::Block, vec![block.hash]).await;
            }

            if self.mempool.lock().await.is_empty() {
                break;
            }
        }

        Ok(())
    }

    /// Pending transactions that verify against the chain and spend indexed
    /// outputs, skipping any that reuse an input already selected.
    /// Invalid transactions are dropped from the mempool.
    async fn select_for_block(&self, candidates: Vec<Transaction>) -> Result<Vec<Transaction>> {
        let mut selected = Vec::new();
        let mut invalid = Vec::new();

        {
            let storage = self.storage.read().await;
            let mut spent = HashSet::new();

            for tx in candidates {
                let outpoints: Vec<OutPoint> = tx
                    .inputs
                    .iter()
                    .map(|input| OutPoint::new(input.prev_tx_id, input.prev_index))
                    .collect();

                if outpoints.iter().any(|op| spent.contains(op)) {
                    log::debug!("Skipping {}: double-spends a selected input", tx.id);
                    continue;
                }

                if !spends_unspent(&storage, &tx)? || !storage.blockchain.verify_transaction(&tx)? {
                    invalid.push(tx.id);
                    continue;
                }

                spent.extend(outpoints);
                selected.push(tx);
            }
        }

        if !invalid.is_empty() {
            let mut mempool = self.mempool.lock().await;
            for id in &invalid {
                log::warn!("Dropping invalid transaction {}", id);
                mempool.remove(id);
            }
        }

        Ok(selected)
    }

    /// Send one message; a peer that cannot be reached is forgotten
    async fn send_message(&self, addr: &str, message: Message) {
        if let Err(e) = send_data(addr, &message.serialize(), self.config.io_timeout).await {
            log::warn!("{} is not available: {}", addr, e);
            self.peers.write().await.remove(addr);
        }
    }

    async fn send_version(&self, addr: &str) -> Result<()> {
        let best_height = self.best_height().await?;
        let message = Message::Version(VersionMessage {
            version: NODE_VERSION,
            best_height,
            addr_from: self.address().to_string(),
        });
        self.send_message(addr, message).await;
        Ok(())
    }

    async fn send_get_blocks(&self, addr: &str) {
        let message = Message::GetBlocks {
            addr_from: self.address().to_string(),
        };
        self.send_message(addr, message).await;
    }

    async fn send_inv(&self, addr: &str, inv_type: InvType, items: Vec<Hash256>) {
        let message = Message::Inv(InvMessage {
            addr_from: self.address().to_string(),
            inv_type,
            items,
        });
        self.send_message(addr, message).await;
    }

    async fn send_get_data(&self, addr: &str, inv_type: InvType, id: Hash256) {
        let message = Message::GetData(GetDataMessage {
            addr_from: self.address().to_string(),
            inv_type,
            id,
        });
        self.send_message(addr, message).await;
    }

    async fn send_block(&self, addr: &str, block: Block) {
        let message = Message::Block {
            addr_from: self.address().to_string(),
            block,
        };
        self.send_message(addr, message).await;
    }

    async fn send_tx(&self, addr: &str, transaction: Transaction) {
        let message = Message::Tx {
            addr_from: self.address().to_string(),
            transaction,
        };
        self.send_message(addr, message).await;
    }
}

/// Every input of `tx` spends an output the UTXO set still holds
fn spends_unspent(storage: &Storage, tx: &Transaction) -> Result<bool> {
    for input in &tx.inputs {
        let outpoint = OutPoint::new(input.prev_tx_id, input.prev_index);
        if !storage.utxo_set.is_unspent(&outpoint)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Mine `transactions` and `coinbase` on the current tip, leaving out any
/// transaction whose inputs were spent after it was selected.
/// Returns `None` when nothing is left to mine.
fn mine_unspent(
    storage: &Storage,
    transactions: Vec<Transaction>,
    coinbase: Transaction,
) -> Result<Option<Block>> {
    let mut block_txs = Vec::with_capacity(transactions.len() + 1);
    for tx in transactions {
        if spends_unspent(storage, &tx)? {
            block_txs.push(tx);
        } else {
            log::warn!("Leaving out {}: its inputs are already spent", tx.id);
        }
    }
    if block_txs.is_empty() {
        return Ok(None);
    }

    block_txs.push(coinbase);
    let block = storage.blockchain.mine_block(block_txs)?;
    storage.utxo_set.update(&block)?;
    Ok(Some(block))
}

/// Submit a transaction to `to` without running a node
pub async fn submit_transaction(
    to: &str,
    addr_from: &str,
    transaction: Transaction,
    io_timeout: Duration,
) -> Result<()> {
    let message = Message::Tx {
        addr_from: addr_from.to_string(),
        transaction,
    };
    send_data(to, &message.serialize(), io_timeout).await
}
