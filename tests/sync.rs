// Multi-node tests over real sockets on 127.0.0.1

use std::time::Duration;
use tokio::net::TcpListener;
use utxo_ledger::config::NodeConfig;
use utxo_ledger::network::{Message, send_data, submit_transaction};
use utxo_ledger::wallet::{TransactionBuilder, new_coinbase_tx};
use utxo_ledger::{Address, Block, Miner, Node, Storage, Wallets};

const DIFFICULTY: u32 = 8;
const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn miner() -> Miner {
    Miner::new(DIFFICULTY)
}

fn genesis_storage(to: &Address) -> (Storage, Block) {
    let coinbase = new_coinbase_tx(to, Some(b"genesis".to_vec())).unwrap();
    let storage = Storage::memory(coinbase, miner()).unwrap();
    let genesis = storage
        .blockchain
        .get_block(&storage.blockchain.tip_hash().unwrap())
        .unwrap();
    (storage, genesis)
}

fn mine_reward(storage: &Storage, to: &Address) -> Block {
    let block = storage
        .blockchain
        .mine_block(vec![new_coinbase_tx(to, None).unwrap()])
        .unwrap();
    storage.utxo_set.update(&block).unwrap();
    block
}

fn copy_blocks(storage: &Storage, blocks: &[Block]) {
    for block in blocks {
        storage.blockchain.add_block(block).unwrap();
        storage.utxo_set.update(block).unwrap();
    }
}

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    (listener, addr)
}

fn start(node: &Node, listener: TcpListener) {
    tokio::spawn(node.clone().serve(listener));
}

async fn wait_for_height(node: &Node, height: u64) -> bool {
    for _ in 0..100 {
        if node.best_height().await.unwrap() >= height {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

fn seed_config(addr: &str) -> NodeConfig {
    NodeConfig::default()
        .with_address(addr)
        .with_seed_nodes(vec![addr.to_string()])
        .with_difficulty(DIFFICULTY)
        .with_io_timeout(IO_TIMEOUT)
}

async fn block_hashes(node: &Node) -> Vec<utxo_ledger::Hash256> {
    node.storage.read().await.blockchain.get_block_hashes().unwrap()
}

async fn wait_for_balance(node: &Node, address: &Address, expected: u64) -> bool {
    for _ in 0..50 {
        if balance(node, address).await == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

async fn balance(node: &Node, address: &Address) -> u64 {
    let storage = node.storage.read().await;
    storage
        .utxo_set
        .balance(&address.to_pubkey_hash().unwrap())
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shorter_node_downloads_missing_blocks() {
    let mut wallets = Wallets::new();
    let alice = wallets.create_wallet();
    let bob = wallets.create_wallet();

    let (seed_storage, genesis) = genesis_storage(&alice);
    let blocks: Vec<Block> = (0..4).map(|_| mine_reward(&seed_storage, &bob)).collect();

    let peer_storage = Storage::memory_from_genesis(genesis, miner()).unwrap();
    copy_blocks(&peer_storage, &blocks[..2]);

    let (seed_listener, seed_addr) = bind().await;
    let (peer_listener, peer_addr) = bind().await;

    let seed = Node::new(seed_config(&seed_addr), seed_storage).unwrap();
    let peer = Node::new(seed_config(&seed_addr).with_address(peer_addr), peer_storage).unwrap();
    assert_eq!(seed.best_height().await.unwrap(), 4);
    assert_eq!(peer.best_height().await.unwrap(), 2);

    start(&seed, seed_listener);
    start(&peer, peer_listener);

    assert!(wait_for_height(&peer, 4).await, "peer never caught up");

    // Missing blocks arrive tip first; the UTXO set is rebuilt once they are all in
    assert!(
        wait_for_balance(&peer, &bob, 40).await,
        "peer UTXO set does not match the downloaded chain"
    );
    assert_eq!(balance(&peer, &alice).await, 10);

    let seed_tip = seed.storage.read().await.blockchain.tip_hash().unwrap();
    let peer_tip = peer.storage.read().await.blockchain.tip_hash().unwrap();
    assert_eq!(seed_tip, peer_tip);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_miner_confirms_relayed_transactions() {
    let mut wallets = Wallets::new();
    let alice = wallets.create_wallet();
    let bob = wallets.create_wallet();
    let carol = wallets.create_wallet();
    let rewards = wallets.create_wallet();

    let (seed_storage, genesis) = genesis_storage(&alice);
    let block = mine_reward(&seed_storage, &carol);

    let miner_storage = Storage::memory_from_genesis(genesis, miner()).unwrap();
    copy_blocks(&miner_storage, &[block]);

    let (seed_listener, seed_addr) = bind().await;
    let (miner_listener, miner_addr) = bind().await;

    let miner_config = seed_config(&seed_addr)
        .with_address(miner_addr.clone())
        .with_mining_address(Some(rewards.to_string()));

    let seed = Node::new(seed_config(&seed_addr), seed_storage).unwrap();
    let miner_node = Node::new(miner_config, miner_storage).unwrap();
    start(&seed, seed_listener);
    start(&miner_node, miner_listener);

    // Equal heights: the seed only registers the miner
    let mut registered = false;
    for _ in 0..50 {
        if seed.known_peers().await.contains(&miner_addr) {
            registered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(registered, "seed never registered the miner");

    let (first, second) = {
        let storage = seed.storage.read().await;
        let builder = TransactionBuilder::new(&wallets, &storage);
        (
            builder.build(&alice, &bob, 4).unwrap(),
            builder.build(&carol, &bob, 3).unwrap(),
        )
    };

    let client = "127.0.0.1:1";
    submit_transaction(&seed_addr, client, first, IO_TIMEOUT)
        .await
        .unwrap();
    submit_transaction(&seed_addr, client, second, IO_TIMEOUT)
        .await
        .unwrap();

    assert!(wait_for_height(&seed, 2).await, "mined block never reached the seed");

    assert!(
        wait_for_balance(&seed, &bob, 7).await,
        "seed UTXO set does not include the mined block"
    );

    assert_eq!(balance(&seed, &alice).await, 6);
    assert_eq!(balance(&seed, &carol).await, 7);
    assert_eq!(balance(&seed, &rewards).await, 10);
    assert_eq!(balance(&miner_node, &bob).await, 7);
    assert!(seed.mempool.lock().await.is_empty());
    assert!(miner_node.mempool.lock().await.is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_divergent_shorter_node_adopts_taller_chain() {
    let mut wallets = Wallets::new();
    let alice = wallets.create_wallet();
    let bob = wallets.create_wallet();
    let carol = wallets.create_wallet();

    let (tall_storage, genesis) = genesis_storage(&alice);
    for _ in 0..5 {
        mine_reward(&tall_storage, &bob);
    }
    let short_storage = Storage::memory_from_genesis(genesis, miner()).unwrap();
    for _ in 0..3 {
        mine_reward(&short_storage, &carol);
    }

    let (tall_listener, tall_addr) = bind().await;
    let (short_listener, short_addr) = bind().await;

    let tall = Node::new(seed_config(&tall_addr), tall_storage).unwrap();
    let short = Node::new(
        seed_config(&tall_addr).with_address(short_addr),
        short_storage,
    )
    .unwrap();
    assert_eq!(short.best_height().await.unwrap(), 3);
    assert_eq!(balance(&short, &carol).await, 30);

    start(&tall, tall_listener);
    start(&short, short_listener);

    assert!(wait_for_height(&short, 5).await, "short node never caught up");
    assert!(
        wait_for_balance(&short, &bob, 50).await,
        "UTXO set was not rebuilt for the adopted chain"
    );

    assert_eq!(block_hashes(&short).await, block_hashes(&tall).await);
    assert_eq!(balance(&short, &carol).await, 0);
    assert_eq!(balance(&short, &alice).await, 10);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_block_with_unknown_parent_fetches_ancestors() {
    let mut wallets = Wallets::new();
    let alice = wallets.create_wallet();
    let bob = wallets.create_wallet();

    let (source_storage, genesis) = genesis_storage(&alice);
    let blocks: Vec<Block> = (0..2).map(|_| mine_reward(&source_storage, &bob)).collect();
    let target_storage = Storage::memory_from_genesis(genesis, miner()).unwrap();

    let (source_listener, source_addr) = bind().await;
    let (target_listener, target_addr) = bind().await;

    // Both nodes are their own seed, so neither starts a version exchange
    let source = Node::new(seed_config(&source_addr), source_storage).unwrap();
    let target = Node::new(seed_config(&target_addr), target_storage).unwrap();
    start(&source, source_listener);
    start(&target, target_listener);

    // Only the tip arrives, without an announcement
    let message = Message::Block {
        addr_from: source_addr.clone(),
        block: blocks[1].clone(),
    };
    send_data(&target_addr, &message.serialize(), IO_TIMEOUT)
        .await
        .unwrap();

    assert!(wait_for_height(&target, 2).await);

    let mut walkable = false;
    for _ in 0..50 {
        let hashes = target.storage.read().await.blockchain.get_block_hashes();
        if hashes.is_ok_and(|h| h.len() == 3) {
            walkable = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(walkable, "missing parent was never fetched");

    assert_eq!(block_hashes(&target).await, block_hashes(&source).await);
    assert!(
        wait_for_balance(&target, &bob, 20).await,
        "UTXO set was not rebuilt once the parent arrived"
    );
    assert_eq!(balance(&target, &alice).await, 10);
}
