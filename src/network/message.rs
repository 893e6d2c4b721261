// Network protocol messages

use super::error::{NetworkError, Result};
use crate::config::COMMAND_LENGTH;
use crate::core::{
    Block, CodecError, Hash256, Serializable, Transaction, ensure_consumed, read_hash,
    read_string, read_u32, read_u64, read_var_bytes, read_varint, write_string, write_var_bytes,
    write_varint,
};
use std::io::{Cursor, Read, Write};

/// Network message types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Version,
    GetBlocks,
    Inv,
    GetData,
    Block,
    Tx,
    Addr,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Version => "version",
            MessageType::GetBlocks => "getblocks",
            MessageType::Inv => "inv",
            MessageType::GetData => "getdata",
            MessageType::Block => "block",
            MessageType::Tx => "tx",
            MessageType::Addr => "addr",
        }
    }

    pub fn from_command(s: &str) -> Option<Self> {
        match s {
            "version" => Some(MessageType::Version),
            "getblocks" => Some(MessageType::GetBlocks),
            "inv" => Some(MessageType::Inv),
            "getdata" => Some(MessageType::GetData),
            "block" => Some(MessageType::Block),
            "tx" => Some(MessageType::Tx),
            "addr" => Some(MessageType::Addr),
            _ => None,
        }
    }
}

/// Inventory type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvType {
    Block,
    Tx,
}

impl InvType {
    fn to_byte(self) -> u8 {
        match self {
            InvType::Block => 1,
            InvType::Tx => 2,
        }
    }

    fn from_byte(byte: u8) -> std::result::Result<Self, CodecError> {
        match byte {
            1 => Ok(InvType::Block),
            2 => Ok(InvType::Tx),
            other => Err(CodecError::Invalid(format!("unknown inventory type {}", other))),
        }
    }
}

/// Version message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: u32,
    pub best_height: u64,
    pub addr_from: String,
}

/// Inventory message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvMessage {
    pub addr_from: String,
    pub inv_type: InvType,
    pub items: Vec<Hash256>,
}

/// Request for one block or transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetDataMessage {
    pub addr_from: String,
    pub inv_type: InvType,
    pub id: Hash256,
}

/// Network message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    GetBlocks { addr_from: String },
    Inv(InvMessage),
    GetData(GetDataMessage),
    Block { addr_from: String, block: Block },
    Tx { addr_from: String, transaction: Transaction },
    Addr { addr_list: Vec<String> },
}

impl Message {
    /// Get message type
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Version(_) => MessageType::Version,
            Message::GetBlocks { .. } => MessageType::GetBlocks,
            Message::Inv(_) => MessageType::Inv,
            Message::GetData(_) => MessageType::GetData,
            Message::Block { .. } => MessageType::Block,
            Message::Tx { .. } => MessageType::Tx,
            Message::Addr { .. } => MessageType::Addr,
        }
    }

    /// Address of the sending node, for messages that carry one
    pub fn addr_from(&self) -> Option<&str> {
        match self {
            Message::Version(v) => Some(&v.addr_from),
            Message::GetBlocks { addr_from }
            | Message::Block { addr_from, .. }
            | Message::Tx { addr_from, .. } => Some(addr_from),
            Message::Inv(inv) => Some(&inv.addr_from),
            Message::GetData(get) => Some(&get.addr_from),
            Message::Addr { .. } => None,
        }
    }

    /// `[command, zero-padded to 12 bytes][payload]`
    pub fn serialize(&self) -> Vec<u8> {
        let mut bytes = command_to_bytes(self.message_type().as_str()).to_vec();
        bytes.extend_from_slice(&self.serialize_payload());
        bytes
    }

    /// Serialize message payload
    fn serialize_payload(&self) -> Vec<u8> {
        let mut buf = Vec::new();

        match self {
            Message::Version(v) => {
                buf.write_all(&v.version.to_le_bytes()).unwrap();
                buf.write_all(&v.best_height.to_le_bytes()).unwrap();
                write_string(&mut buf, &v.addr_from).unwrap();
            }
            Message::GetBlocks { addr_from } => {
                write_string(&mut buf, addr_from).unwrap();
            }
            Message::Inv(inv) => {
                write_string(&mut buf, &inv.addr_from).unwrap();
                buf.push(inv.inv_type.to_byte());
                write_varint(&mut buf, inv.items.len() as u64).unwrap();
                for hash in &inv.items {
                    buf.write_all(hash.as_bytes()).unwrap();
                }
            }
            Message::GetData(get) => {
                write_string(&mut buf, &get.addr_from).unwrap();
                buf.push(get.inv_type.to_byte());
                buf.write_all(get.id.as_bytes()).unwrap();
            }
            Message::Block { addr_from, block } => {
                write_string(&mut buf, addr_from).unwrap();
                write_var_bytes(&mut buf, &block.serialize()).unwrap();
            }
            Message::Tx {
                addr_from,
                transaction,
            } => {
                write_string(&mut buf, addr_from).unwrap();
                write_var_bytes(&mut buf, &transaction.serialize()).unwrap();
            }
            Message::Addr { addr_list } => {
                write_varint(&mut buf, addr_list.len() as u64).unwrap();
                for addr in addr_list {
                    write_string(&mut buf, addr).unwrap();
                }
            }
        }

        buf
    }

    /// Deserialize a complete message
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < COMMAND_LENGTH {
            return Err(CodecError::InvalidLength {
                expected: COMMAND_LENGTH,
                actual: data.len(),
            }
            .into());
        }

        let (command, payload) = data.split_at(COMMAND_LENGTH);
        let command = bytes_to_command(command);
        let msg_type = MessageType::from_command(&command)
            .ok_or(NetworkError::UnknownCommand(command))?;

        let mut cursor = Cursor::new(payload);
        let message = Self::deserialize_payload(msg_type, &mut cursor)?;
        ensure_consumed(&cursor)?;

        Ok(message)
    }

    fn deserialize_payload(
        msg_type: MessageType,
        reader: &mut dyn Read,
    ) -> std::result::Result<Self, CodecError> {
        let message = match msg_type {
            MessageType::Version => Message::Version(VersionMessage {
                version: read_u32(reader)?,
                best_height: read_u64(reader)?,
                addr_from: read_string(reader)?,
            }),
            MessageType::GetBlocks => Message::GetBlocks {
                addr_from: read_string(reader)?,
            },
            MessageType::Inv => {
                let addr_from = read_string(reader)?;
                let inv_type = InvType::from_byte(read_byte(reader)?)?;
                let count = read_varint(reader)?;
                let mut items = Vec::new();
                for _ in 0..count {
                    items.push(read_hash(reader)?);
                }
                Message::Inv(InvMessage {
                    addr_from,
                    inv_type,
                    items,
                })
            }
            MessageType::GetData => Message::GetData(GetDataMessage {
                addr_from: read_string(reader)?,
                inv_type: InvType::from_byte(read_byte(reader)?)?,
                id: read_hash(reader)?,
            }),
            MessageType::Block => Message::Block {
                addr_from: read_string(reader)?,
                block: Block::deserialize(&read_var_bytes(reader)?)?,
            },
            MessageType::Tx => Message::Tx {
                addr_from: read_string(reader)?,
                transaction: Transaction::deserialize(&read_var_bytes(reader)?)?,
            },
            MessageType::Addr => {
                let count = read_varint(reader)?;
                let mut addr_list = Vec::new();
                for _ in 0..count {
                    addr_list.push(read_string(reader)?);
                }
                Message::Addr { addr_list }
            }
        };

        Ok(message)
    }
}

fn read_byte(reader: &mut dyn Read) -> std::io::Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}

/// Zero-pad an ASCII command to the fixed command width
pub fn command_to_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    let len = command.len().min(COMMAND_LENGTH);
    bytes[..len].copy_from_slice(&command.as_bytes()[..len]);
    bytes
}

/// Strip the zero padding from a command field
pub fn bytes_to_command(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|b| *b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction::coinbase([1u8; 20], 10, b"msg".to_vec())
    }

    #[test]
    fn test_command_padding() {
        let bytes = command_to_bytes("version");
        assert_eq!(&bytes[..7], b"version");
        assert!(bytes[7..].iter().all(|b| *b == 0));
        assert_eq!(bytes_to_command(&bytes), "version");
    }

    #[test]
    fn test_message_type_conversion() {
        for msg_type in [
            MessageType::Version,
            MessageType::GetBlocks,
            MessageType::Inv,
            MessageType::GetData,
            MessageType::Block,
            MessageType::Tx,
            MessageType::Addr,
        ] {
            assert_eq!(MessageType::from_command(msg_type.as_str()), Some(msg_type));
        }
        assert_eq!(MessageType::from_command("ping"), None);
    }

    #[test]
    fn test_message_layout() {
        let msg = Message::GetBlocks {
            addr_from: "localhost:3001".to_string(),
        };
        let bytes = msg.serialize();

        assert_eq!(&bytes[..9], b"getblocks");
        assert_eq!(bytes[COMMAND_LENGTH], 14); // address length prefix
        assert_eq!(Message::deserialize(&bytes).unwrap(), msg);
    }

    #[test]
    fn test_payload_serialization() {
        let block = Block {
            timestamp: 1_700_000_000,
            transactions: vec![sample_tx()],
            prev_hash: Hash256::zero(),
            hash: Hash256::new([3; 32]),
            nonce: 9,
            height: 0,
        };

        let messages = vec![
            Message::Version(VersionMessage {
                version: 1,
                best_height: 5,
                addr_from: "localhost:3000".to_string(),
            }),
            Message::Inv(InvMessage {
                addr_from: "localhost:3000".to_string(),
                inv_type: InvType::Block,
                items: vec![Hash256::new([1; 32]), Hash256::new([2; 32])],
            }),
            Message::GetData(GetDataMessage {
                addr_from: "localhost:3001".to_string(),
                inv_type: InvType::Tx,
                id: Hash256::new([4; 32]),
            }),
            Message::Block {
                addr_from: "localhost:3000".to_string(),
                block,
            },
            Message::Tx {
                addr_from: "localhost:3002".to_string(),
                transaction: sample_tx(),
            },
            Message::Addr {
                addr_list: vec!["localhost:3001".to_string(), "localhost:3002".to_string()],
            },
        ];

        for msg in messages {
            let decoded = Message::deserialize(&msg.serialize()).unwrap();
            assert_eq!(decoded, msg);
        }
    }

    #[test]
    fn test_malformed_messages() {
        assert!(matches!(
            Message::deserialize(b"short"),
            Err(NetworkError::Codec(_))
        ));

        let mut unknown = command_to_bytes("ping").to_vec();
        unknown.extend_from_slice(&[1, 2, 3]);
        assert!(matches!(
            Message::deserialize(&unknown),
            Err(NetworkError::UnknownCommand(cmd)) if cmd == "ping"
        ));

        let msg = Message::Tx {
            addr_from: "localhost:3000".to_string(),
            transaction: sample_tx(),
        };
        let bytes = msg.serialize();
        assert!(Message::deserialize(&bytes[..bytes.len() - 3]).is_err());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(Message::deserialize(&trailing).is_err());

        let mut bad_inv = command_to_bytes("getdata").to_vec();
        write_string(&mut bad_inv, "x").unwrap();
        bad_inv.push(7);
        bad_inv.extend_from_slice(&[0; 32]);
        assert!(Message::deserialize(&bad_inv).is_err());
    }
}
