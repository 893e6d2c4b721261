// Transaction data structures, signing and verification

use super::serialize::{
    ensure_consumed, read_hash, read_u32, read_u64, read_var_bytes, read_varint,
    write_var_bytes, write_varint,
};
use crate::core::{CodecError, Hash256, PubKeyHash, Serializable, TransactionError, hash160, sha256};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey, ecdsa::Signature};
use std::collections::HashMap;
use std::fmt;
use std::io::{Cursor, Read, Write};

/// Output index carried by a coinbase input. No transaction has this many outputs.
pub const COINBASE_OUTPUT_INDEX: u32 = u32::MAX;

/// Previous transactions an input set refers to, keyed by id
pub type PrevTransactions = HashMap<Hash256, Transaction>;

/// Transaction input - references a previous transaction output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    /// Id of the transaction holding the spent output
    pub prev_tx_id: Hash256,
    /// Index of the output in the previous transaction
    pub prev_index: u32,
    /// Compact ECDSA signature (r ‖ s)
    pub signature: Vec<u8>,
    /// Spender's public key. Coinbase inputs carry arbitrary data here.
    pub public_key: Vec<u8>,
}

impl TxInput {
    /// Create an unsigned input spending `prev_tx_id:prev_index`
    pub fn new(prev_tx_id: Hash256, prev_index: u32, public_key: Vec<u8>) -> Self {
        Self {
            prev_tx_id,
            prev_index,
            signature: Vec::new(),
            public_key,
        }
    }

    /// Create a coinbase input (for mining rewards)
    pub fn coinbase(data: Vec<u8>) -> Self {
        Self {
            prev_tx_id: Hash256::zero(),
            prev_index: COINBASE_OUTPUT_INDEX,
            signature: Vec::new(),
            public_key: data,
        }
    }

    /// Check if this is a coinbase input
    pub fn is_coinbase(&self) -> bool {
        self.prev_tx_id.is_zero() && self.prev_index == COINBASE_OUTPUT_INDEX
    }

    /// Whether this input was signed by the key hashing to `pubkey_hash`
    pub fn uses_key(&self, pubkey_hash: &PubKeyHash) -> bool {
        hash160(&self.public_key) == *pubkey_hash
    }

    /// Serialize the input
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_all(self.prev_tx_id.as_bytes()).unwrap();
        buf.write_all(&self.prev_index.to_le_bytes()).unwrap();
        write_var_bytes(&mut buf, &self.signature).unwrap();
        write_var_bytes(&mut buf, &self.public_key).unwrap();
        buf
    }

    /// Deserialize the input
    pub fn deserialize(reader: &mut dyn Read) -> Result<Self, CodecError> {
        let prev_tx_id = read_hash(reader)?;
        let prev_index = read_u32(reader)?;
        let signature = read_var_bytes(reader)?;
        let public_key = read_var_bytes(reader)?;

        Ok(Self {
            prev_tx_id,
            prev_index,
            signature,
            public_key,
        })
    }
}

/// Transaction output - an amount locked to a public key hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub value: u64,
    pub pubkey_hash: PubKeyHash,
}

impl TxOutput {
    /// Create a new transaction output
    pub fn new(value: u64, pubkey_hash: PubKeyHash) -> Self {
        Self { value, pubkey_hash }
    }

    /// Check whether the output is locked to `pubkey_hash`
    pub fn is_locked_with_key(&self, pubkey_hash: &PubKeyHash) -> bool {
        self.pubkey_hash == *pubkey_hash
    }

    /// Serialize the output
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(28);
        buf.write_all(&self.value.to_le_bytes()).unwrap();
        buf.write_all(&self.pubkey_hash).unwrap();
        buf
    }

    /// Deserialize the output
    pub fn deserialize(reader: &mut dyn Read) -> Result<Self, CodecError> {
        let value = read_u64(reader)?;
        let mut pubkey_hash = [0u8; 20];
        reader.read_exact(&mut pubkey_hash)?;

        Ok(Self { value, pubkey_hash })
    }
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    /// SHA256 of the transaction serialized with this field zeroed
    pub id: Hash256,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    /// Create a transaction and assign its id
    pub fn new(inputs: Vec<TxInput>, outputs: Vec<TxOutput>) -> Self {
        let mut tx = Self {
            id: Hash256::zero(),
            inputs,
            outputs,
        };
        tx.id = tx.hash();
        tx
    }

    /// Create a coinbase transaction paying `value` to `to`
    pub fn coinbase(to: PubKeyHash, value: u64, data: Vec<u8>) -> Self {
        Self::new(vec![TxInput::coinbase(data)], vec![TxOutput::new(value, to)])
    }

    /// Exactly one input with an empty referenced id and an out-of-range index
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].is_coinbase()
    }

    /// Hash of the transaction with its id cleared
    pub fn hash(&self) -> Hash256 {
        let mut copy = self.clone();
        copy.id = Hash256::zero();
        sha256(&copy.serialize())
    }

    /// Copy with every input's signature and public key removed
    fn trimmed_copy(&self) -> Transaction {
        let inputs = self
            .inputs
            .iter()
            .map(|input| TxInput::new(input.prev_tx_id, input.prev_index, Vec::new()))
            .collect();

        Transaction {
            id: self.id,
            inputs,
            outputs: self.outputs.clone(),
        }
    }

    /// Digest signed for input `index`: the trimmed copy's hash with that
    /// input's public key field set to the locking hash of the output it spends.
    fn input_digest(trimmed: &mut Transaction, index: usize, locking_hash: &PubKeyHash) -> Hash256 {
        trimmed.inputs[index].public_key = locking_hash.to_vec();
        trimmed.id = trimmed.hash();
        trimmed.inputs[index].public_key = Vec::new();
        trimmed.id
    }

    /// Sign every input with `secret_key`.
    /// `prev_txs` must contain each transaction referenced by an input.
    pub fn sign(
        &mut self,
        secret_key: &SecretKey,
        prev_txs: &PrevTransactions,
    ) -> Result<(), TransactionError> {
        if self.is_coinbase() {
            return Ok(());
        }

        let secp = Secp256k1::signing_only();
        let mut trimmed = self.trimmed_copy();

        for index in 0..self.inputs.len() {
            let input = &self.inputs[index];
            let prev_tx = prev_txs
                .get(&input.prev_tx_id)
                .ok_or(TransactionError::MissingPrevious(input.prev_tx_id))?;
            let spent = prev_tx.outputs.get(input.prev_index as usize).ok_or(
                TransactionError::OutputOutOfRange {
                    txid: input.prev_tx_id,
                    index: input.prev_index,
                },
            )?;

            let digest = Self::input_digest(&mut trimmed, index, &spent.pubkey_hash);
            let message = Message::from_digest(digest.0);
            let signature = secp.sign_ecdsa(&message, secret_key);

            self.inputs[index].signature = signature.serialize_compact().to_vec();
        }

        Ok(())
    }

    /// Verify every input signature against the outputs it spends.
    /// Fails closed: anything that cannot be checked is invalid.
    pub fn verify(&self, prev_txs: &PrevTransactions) -> bool {
        if self.is_coinbase() {
            return true;
        }

        let secp = Secp256k1::verification_only();
        let mut trimmed = self.trimmed_copy();

        for (index, input) in self.inputs.iter().enumerate() {
            let Some(prev_tx) = prev_txs.get(&input.prev_tx_id) else {
                return false;
            };
            let Some(spent) = prev_tx.outputs.get(input.prev_index as usize) else {
                return false;
            };

            // The key presented must be the one the output is locked to
            if !input.uses_key(&spent.pubkey_hash) {
                return false;
            }

            let Ok(public_key) = PublicKey::from_slice(&input.public_key) else {
                return false;
            };
            let Ok(signature) = Signature::from_compact(&input.signature) else {
                return false;
            };

            let digest = Self::input_digest(&mut trimmed, index, &spent.pubkey_hash);
            let message = Message::from_digest(digest.0);
            if secp.verify_ecdsa(&message, &signature, &public_key).is_err() {
                return false;
            }
        }

        true
    }

    /// Deserialize from a reader (used when transactions are embedded in blocks)
    pub fn from_reader(reader: &mut dyn Read) -> Result<Self, CodecError> {
        let id = read_hash(reader)?;

        let input_count = read_varint(reader)? as usize;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            inputs.push(TxInput::deserialize(reader)?);
        }

        let output_count = read_varint(reader)? as usize;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            outputs.push(TxOutput::deserialize(reader)?);
        }

        Ok(Self {
            id,
            inputs,
            outputs,
        })
    }
}

impl Serializable for Transaction {
    fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        buf.write_all(self.id.as_bytes()).unwrap();

        write_varint(&mut buf, self.inputs.len() as u64).unwrap();
        for input in &self.inputs {
            buf.write_all(&input.serialize()).unwrap();
        }

        write_varint(&mut buf, self.outputs.len() as u64).unwrap();
        for output in &self.outputs {
            buf.write_all(&output.serialize()).unwrap();
        }

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = Cursor::new(data);
        let tx = Self::from_reader(&mut cursor)?;
        ensure_consumed(&cursor)?;
        Ok(tx)
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "--- Transaction {}:", self.id)?;
        for (i, input) in self.inputs.iter().enumerate() {
            writeln!(f, "     Input {}:", i)?;
            if input.is_coinbase() {
                writeln!(f, "       Coinbase:  {}", String::from_utf8_lossy(&input.public_key))?;
                continue;
            }
            writeln!(f, "       TXID:      {}", input.prev_tx_id)?;
            writeln!(f, "       Out:       {}", input.prev_index)?;
            writeln!(f, "       Signature: {}", hex::encode(&input.signature))?;
            writeln!(f, "       PubKey:    {}", hex::encode(&input.public_key))?;
        }
        for (i, output) in self.outputs.iter().enumerate() {
            writeln!(f, "     Output {}:", i)?;
            writeln!(f, "       Value:  {}", output.value)?;
            writeln!(f, "       Script: {}", hex::encode(output.pubkey_hash))?;
        }
        Ok(())
    }
}
