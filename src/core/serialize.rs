// Binary serialization utilities for ledger data structures

use crate::core::{CodecError, Hash256};
use std::io::{self, Cursor, Read, Write};

/// Trait for serializable types
pub trait Serializable {
    fn serialize(&self) -> Vec<u8>;
    fn deserialize(data: &[u8]) -> Result<Self, CodecError>
    where
        Self: Sized;
}

/// Write a variable-length integer (VarInt)
/// Compact format: one byte below 0xfd, otherwise a marker plus 2, 4 or 8 bytes
pub fn write_varint<W: Write>(writer: &mut W, value: u64) -> io::Result<()> {
    match value {
        0..=0xfc => {
            writer.write_all(&[value as u8])?;
        }
        0xfd..=0xffff => {
            writer.write_all(&[0xfd])?;
            writer.write_all(&(value as u16).to_le_bytes())?;
        }
        0x10000..=0xffffffff => {
            writer.write_all(&[0xfe])?;
            writer.write_all(&(value as u32).to_le_bytes())?;
        }
        _ => {
            writer.write_all(&[0xff])?;
            writer.write_all(&value.to_le_bytes())?;
        }
    }
    Ok(())
}

/// Read a variable-length integer (VarInt)
pub fn read_varint<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut first_byte = [0u8; 1];
    reader.read_exact(&mut first_byte)?;

    match first_byte[0] {
        0..=0xfc => Ok(first_byte[0] as u64),
        0xfd => {
            let mut bytes = [0u8; 2];
            reader.read_exact(&mut bytes)?;
            Ok(u16::from_le_bytes(bytes) as u64)
        }
        0xfe => {
            let mut bytes = [0u8; 4];
            reader.read_exact(&mut bytes)?;
            Ok(u32::from_le_bytes(bytes) as u64)
        }
        0xff => {
            let mut bytes = [0u8; 8];
            reader.read_exact(&mut bytes)?;
            Ok(u64::from_le_bytes(bytes))
        }
    }
}

/// Write bytes with length prefix (VarInt length + data)
pub fn write_var_bytes<W: Write>(writer: &mut W, data: &[u8]) -> io::Result<()> {
    write_varint(writer, data.len() as u64)?;
    writer.write_all(data)?;
    Ok(())
}

/// Read bytes with length prefix.
/// Never allocates more than the reader actually holds.
pub fn read_var_bytes<R: Read + ?Sized>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = read_varint(reader)?;
    let mut data = Vec::new();
    let read = reader.take(len).read_to_end(&mut data)?;
    if (read as u64) < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {} bytes, got {}", len, read),
        ));
    }
    Ok(data)
}

pub fn write_string<W: Write>(writer: &mut W, value: &str) -> io::Result<()> {
    write_var_bytes(writer, value.as_bytes())
}

pub fn read_string<R: Read + ?Sized>(reader: &mut R) -> Result<String, CodecError> {
    let bytes = read_var_bytes(reader)?;
    String::from_utf8(bytes).map_err(|e| CodecError::Invalid(format!("invalid utf-8: {}", e)))
}

pub fn read_hash<R: Read + ?Sized>(reader: &mut R) -> io::Result<Hash256> {
    let mut bytes = [0u8; 32];
    reader.read_exact(&mut bytes)?;
    Ok(Hash256::new(bytes))
}

pub fn read_u32<R: Read + ?Sized>(reader: &mut R) -> io::Result<u32> {
    let mut bytes = [0u8; 4];
    reader.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

pub fn read_u64<R: Read + ?Sized>(reader: &mut R) -> io::Result<u64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(u64::from_le_bytes(bytes))
}

pub fn read_i64<R: Read + ?Sized>(reader: &mut R) -> io::Result<i64> {
    let mut bytes = [0u8; 8];
    reader.read_exact(&mut bytes)?;
    Ok(i64::from_le_bytes(bytes))
}

/// Fail if a decoder left bytes unread
pub fn ensure_consumed(cursor: &Cursor<&[u8]>) -> Result<(), CodecError> {
    let total = cursor.get_ref().len() as u64;
    if cursor.position() != total {
        return Err(CodecError::Invalid(format!(
            "{} trailing bytes",
            total - cursor.position()
        )));
    }
    Ok(())
}
