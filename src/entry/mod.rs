//! Entry Module
//!
//! Typed values and their fixed-size on-flash records.
//!
//! ## Responsibilities
//! - Type tags for every storable type
//! - `Value` tagged union (the only way values cross the API)
//! - 32-byte entry records with CRC32, encode/decode
//! - Fragment-chain descriptors for strings and blobs
//!
//! ## Entry Format
//! ```text
//! ┌───────┬────────┬────────┬─────────┬─────────┬───────────┬──────────┐
//! │ NS(1) │ Type(1)│ Span(1)│ Chunk(1)│ CRC(4)  │  Key(16)  │ Data(8)  │
//! └───────┴────────┴────────┴─────────┴─────────┴───────────┴──────────┘
//! ```
//! - Scalars: Data = little-endian value, padded with 0xFF
//! - Chain head (Chunk = 0xFF): total_len u32 | fragments u8 | generation u8
//! - Fragment (Chunk = index): len u16 | generation u8 | next u8 | data_crc u32,
//!   followed by `span - 1` raw payload slots

mod codec;

use std::fmt;

pub use codec::{
    validate_key, ChainHead, Entry, FragmentHeader, CHAIN_END, CHUNK_HEAD, ENTRY_SIZE, KEY_SIZE,
    MAX_FRAGMENTS, MAX_KEY_LEN,
};

use crate::error::{NvsError, Result};

/// Type tag stored with every entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ItemType {
    U8 = 0x01,
    I8 = 0x11,
    U16 = 0x02,
    I16 = 0x12,
    U32 = 0x04,
    I32 = 0x14,
    U64 = 0x08,
    I64 = 0x18,
    Str = 0x21,
    Blob = 0x42,
}

impl ItemType {
    /// Parse a raw tag byte
    pub fn from_tag(tag: u8) -> Option<Self> {
        let item_type = match tag {
            0x01 => ItemType::U8,
            0x11 => ItemType::I8,
            0x02 => ItemType::U16,
            0x12 => ItemType::I16,
            0x04 => ItemType::U32,
            0x14 => ItemType::I32,
            0x08 => ItemType::U64,
            0x18 => ItemType::I64,
            0x21 => ItemType::Str,
            0x42 => ItemType::Blob,
            _ => return None,
        };
        Some(item_type)
    }

    /// Raw tag byte
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Strings and blobs are stored as fragment chains
    pub fn is_variable(self) -> bool {
        matches!(self, ItemType::Str | ItemType::Blob)
    }

    /// Width in bytes of an inline scalar (0 for strings/blobs)
    pub fn width(self) -> usize {
        match self {
            ItemType::U8 | ItemType::I8 => 1,
            ItemType::U16 | ItemType::I16 => 2,
            ItemType::U32 | ItemType::I32 => 4,
            ItemType::U64 | ItemType::I64 => 8,
            ItemType::Str | ItemType::Blob => 0,
        }
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ItemType::U8 => "u8",
            ItemType::I8 => "i8",
            ItemType::U16 => "u16",
            ItemType::I16 => "i16",
            ItemType::U32 => "u32",
            ItemType::I32 => "i32",
            ItemType::U64 => "u64",
            ItemType::I64 => "i64",
            ItemType::Str => "str",
            ItemType::Blob => "blob",
        };
        f.write_str(name)
    }
}

/// A typed value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    Str(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Type tag of this value
    pub fn item_type(&self) -> ItemType {
        match self {
            Value::U8(_) => ItemType::U8,
            Value::I8(_) => ItemType::I8,
            Value::U16(_) => ItemType::U16,
            Value::I16(_) => ItemType::I16,
            Value::U32(_) => ItemType::U32,
            Value::I32(_) => ItemType::I32,
            Value::U64(_) => ItemType::U64,
            Value::I64(_) => ItemType::I64,
            Value::Str(_) => ItemType::Str,
            Value::Blob(_) => ItemType::Blob,
        }
    }

    /// Payload bytes of a string or blob
    pub fn payload(&self) -> Option<&[u8]> {
        match self {
            Value::Str(s) => Some(s.as_bytes()),
            Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Inline data field of a scalar: little-endian, padded with 0xFF
    pub fn scalar_data(&self) -> Option<[u8; 8]> {
        let mut data = [0xFF; 8];
        match self {
            Value::U8(v) => data[..1].copy_from_slice(&v.to_le_bytes()),
            Value::I8(v) => data[..1].copy_from_slice(&v.to_le_bytes()),
            Value::U16(v) => data[..2].copy_from_slice(&v.to_le_bytes()),
            Value::I16(v) => data[..2].copy_from_slice(&v.to_le_bytes()),
            Value::U32(v) => data[..4].copy_from_slice(&v.to_le_bytes()),
            Value::I32(v) => data[..4].copy_from_slice(&v.to_le_bytes()),
            Value::U64(v) => data.copy_from_slice(&v.to_le_bytes()),
            Value::I64(v) => data.copy_from_slice(&v.to_le_bytes()),
            Value::Str(_) | Value::Blob(_) => return None,
        }
        Some(data)
    }

    /// Rebuild a scalar from its inline data field
    pub fn from_scalar_data(item_type: ItemType, data: &[u8; 8]) -> Option<Value> {
        let value = match item_type {
            ItemType::U8 => Value::U8(data[0]),
            ItemType::I8 => Value::I8(data[0] as i8),
            ItemType::U16 => Value::U16(u16::from_le_bytes([data[0], data[1]])),
            ItemType::I16 => Value::I16(i16::from_le_bytes([data[0], data[1]])),
            ItemType::U32 => Value::U32(u32::from_le_bytes([data[0], data[1], data[2], data[3]])),
            ItemType::I32 => Value::I32(i32::from_le_bytes([data[0], data[1], data[2], data[3]])),
            ItemType::U64 => Value::U64(u64::from_le_bytes(*data)),
            ItemType::I64 => Value::I64(i64::from_le_bytes(*data)),
            ItemType::Str | ItemType::Blob => return None,
        };
        Some(value)
    }

    /// Rebuild a string or blob from its reassembled payload
    pub fn from_payload(item_type: ItemType, key: &str, bytes: Vec<u8>) -> Result<Value> {
        match item_type {
            ItemType::Str => String::from_utf8(bytes).map(Value::Str).map_err(|_| {
                NvsError::CorruptEntry(format!("string {:?} is not valid UTF-8", key))
            }),
            ItemType::Blob => Ok(Value::Blob(bytes)),
            other => Err(NvsError::CorruptEntry(format!(
                "{:?}: {} is not a variable-length type",
                key, other
            ))),
        }
    }
}
