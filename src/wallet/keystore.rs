// Key management

use super::error::{Result, WalletError};
use crate::core::{PubKeyHash, base58check_decode, base58check_encode, hash160};
use rand::rngs::OsRng;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Version byte prefixed to the public key hash
pub const ADDRESS_VERSION: u8 = 0x00;

/// Base58Check(version ‖ RIPEMD160(SHA256(public_key)))
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    /// Create address from public key hash
    pub fn from_pubkey_hash(hash: &PubKeyHash) -> Self {
        Self(base58check_encode(ADDRESS_VERSION, hash))
    }

    pub fn from_public_key(public_key: &[u8]) -> Self {
        Self::from_pubkey_hash(&hash160(public_key))
    }

    /// Parse and validate an address string
    pub fn parse(address: &str) -> Result<Self> {
        let parsed = Self(address.to_string());
        parsed.to_pubkey_hash()?;
        Ok(parsed)
    }

    /// Get address string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Recover the public key hash, checking version and checksum
    pub fn to_pubkey_hash(&self) -> Result<PubKeyHash> {
        let invalid = || WalletError::InvalidAddress(self.0.clone());

        let (version, payload) = base58check_decode(&self.0).map_err(|_| invalid())?;
        if version != ADDRESS_VERSION {
            return Err(invalid());
        }

        payload.try_into().map_err(|_| invalid())
    }
}

impl FromStr for Address {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Check whether `address` is a well-formed address with a matching checksum
pub fn validate_address(address: &str) -> bool {
    Address::parse(address).is_ok()
}

/// Serializable key pair (for storage)
#[derive(Serialize, Deserialize)]
struct StoredWallet {
    secret_key: String,
}

/// A single key pair
#[derive(Clone)]
pub struct Wallet {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
}

impl Wallet {
    /// Generate a new key pair
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::new(&mut OsRng);
        let public_key = secret_key.public_key(&secp);

        Self {
            secret_key,
            public_key,
        }
    }

    /// Create from secret key bytes
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secp = Secp256k1::new();
        let secret_key = SecretKey::from_slice(bytes)?;
        let public_key = secret_key.public_key(&secp);

        Ok(Self {
            secret_key,
            public_key,
        })
    }

    /// Compressed public key (33 bytes)
    pub fn pubkey_bytes(&self) -> Vec<u8> {
        self.public_key.serialize().to_vec()
    }

    pub fn pubkey_hash(&self) -> PubKeyHash {
        hash160(&self.pubkey_bytes())
    }

    pub fn address(&self) -> Address {
        Address::from_pubkey_hash(&self.pubkey_hash())
    }

    fn to_stored(&self) -> StoredWallet {
        StoredWallet {
            secret_key: hex::encode(self.secret_key.secret_bytes()),
        }
    }

    fn from_stored(stored: &StoredWallet) -> Result<Self> {
        let bytes = hex::decode(&stored.secret_key)
            .map_err(|_| WalletError::Key(secp256k1::Error::InvalidSecretKey))?;
        Self::from_secret_bytes(&bytes)
    }
}

/// Wallet collection, persisted as one JSON file per node
#[derive(Default)]
pub struct Wallets {
    wallets: HashMap<Address, Wallet>,
}

impl Wallets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate a key pair and return its address
    pub fn create_wallet(&mut self) -> Address {
        let wallet = Wallet::generate();
        let address = wallet.address();
        self.wallets.insert(address.clone(), wallet);
        address
    }

    pub fn get_wallet(&self, address: &Address) -> Option<&Wallet> {
        self.wallets.get(address)
    }

    /// All addresses, sorted
    pub fn list_addresses(&self) -> Vec<Address> {
        let mut addresses: Vec<Address> = self.wallets.keys().cloned().collect();
        addresses.sort();
        addresses
    }

    pub fn count(&self) -> usize {
        self.wallets.len()
    }

    /// Save wallets to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let stored: HashMap<&Address, StoredWallet> = self
            .wallets
            .iter()
            .map(|(address, wallet)| (address, wallet.to_stored()))
            .collect();

        if let Some(parent) = path.as_ref().parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(&stored)?)?;

        Ok(())
    }

    /// Load wallets from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = fs::read_to_string(path)?;
        let stored: HashMap<Address, StoredWallet> = serde_json::from_str(&json)?;

        let mut wallets = HashMap::new();
        for (address, stored_wallet) in stored {
            let wallet = Wallet::from_stored(&stored_wallet)?;
            if wallet.address() != address {
                return Err(WalletError::InvalidAddress(address.to_string()));
            }
            wallets.insert(address, wallet);
        }

        Ok(Self { wallets })
    }

    /// Load wallets, starting empty if the file does not exist yet
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::new())
        }
    }
}
