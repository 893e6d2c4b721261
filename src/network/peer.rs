// Peer transport and known-peer registry

use super::error::{NetworkError, Result};
use crate::config::MAX_MESSAGE_SIZE;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Known peers in the order they were learned. The first entry is the seed node.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    peers: Vec<String>,
}

impl PeerRegistry {
    pub fn new(peers: Vec<String>) -> Self {
        let mut registry = Self::default();
        for peer in peers {
            registry.add(peer);
        }
        registry
    }

    /// Add a peer; returns false if it was already known
    pub fn add(&mut self, addr: impl Into<String>) -> bool {
        let addr = addr.into();
        if self.contains(&addr) {
            return false;
        }
        self.peers.push(addr);
        true
    }

    pub fn remove(&mut self, addr: &str) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p != addr);
        self.peers.len() != before
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.peers.iter().any(|p| p == addr)
    }

    /// All peers except `exclude`
    pub fn others(&self, exclude: &[&str]) -> Vec<String> {
        self.peers
            .iter()
            .filter(|p| !exclude.contains(&p.as_str()))
            .cloned()
            .collect()
    }

    pub fn list(&self) -> Vec<String> {
        self.peers.clone()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Open a connection, write one message and close it
pub async fn send_data(addr: &str, data: &[u8], io_timeout: Duration) -> Result<()> {
    let exchange = async {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(data).await?;
        stream.shutdown().await?;
        Ok::<(), std::io::Error>(())
    };

    timeout(io_timeout, exchange)
        .await
        .map_err(|_| NetworkError::Timeout(addr.to_string()))??;

    Ok(())
}

/// Read one whole message: everything the peer sends until it closes its side
pub async fn read_request(stream: &mut TcpStream, io_timeout: Duration) -> Result<Vec<u8>> {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown peer".to_string());

    let mut data = Vec::new();
    timeout(
        io_timeout,
        (&mut *stream).take(MAX_MESSAGE_SIZE + 1).read_to_end(&mut data),
    )
    .await
    .map_err(|_| NetworkError::Timeout(peer))??;

    if data.len() as u64 > MAX_MESSAGE_SIZE {
        return Err(NetworkError::MessageTooLarge(MAX_MESSAGE_SIZE));
    }

    Ok(data)
}
