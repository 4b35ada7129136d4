//! Entry codec
//!
//! Encoding and decoding of 32-byte entry records.

use bytes::{Buf, BufMut};

use crate::error::{NvsError, Result};

use super::{ItemType, Value};

/// Size of one entry slot
pub const ENTRY_SIZE: usize = 32;

/// Size of the key field (NUL padded)
pub const KEY_SIZE: usize = 16;

/// Longest key / namespace name in bytes
pub const MAX_KEY_LEN: usize = KEY_SIZE - 1;

/// Chunk index of a scalar entry or a chain head
pub const CHUNK_HEAD: u8 = 0xFF;

/// `next` value of the last fragment of a chain
pub const CHAIN_END: u8 = 0xFF;

/// Most fragments a single chain can hold (chunk indexes 0..=254)
pub const MAX_FRAGMENTS: usize = CHUNK_HEAD as usize;

/// Byte range of the CRC field inside a record
const CRC_OFFSET: usize = 4;

/// Check that a key or namespace name fits the key field
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(NvsError::InvalidName("name is empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(NvsError::InvalidName(format!(
            "{:?} is {} bytes (max {})",
            key,
            key.len(),
            MAX_KEY_LEN
        )));
    }
    if key.as_bytes().contains(&0) {
        return Err(NvsError::InvalidName(format!("{:?} contains NUL", key)));
    }
    Ok(())
}

/// Descriptor carried by the head of a fragment chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainHead {
    /// Payload length across all fragments
    pub total_len: u32,
    /// Number of fragments in the chain
    pub fragments: u8,
    /// Distinguishes this chain from the one it replaces
    pub generation: u8,
}

/// Descriptor carried by one fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Payload bytes in this fragment
    pub len: u16,
    /// Generation of the owning chain
    pub generation: u8,
    /// Index of the following fragment, `CHAIN_END` on the last one
    pub next: u8,
    /// CRC32 of this fragment's payload
    pub data_crc: u32,
}

/// One decoded entry record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub ns: u8,
    pub item_type: ItemType,
    /// Slots occupied, including this header slot
    pub span: u8,
    pub chunk: u8,
    pub key: String,
    pub data: [u8; 8],
}

impl Entry {
    /// Record for an inline scalar
    pub fn scalar(ns: u8, key: &str, value: &Value) -> Result<Self> {
        let data = value.scalar_data().ok_or_else(|| {
            NvsError::CorruptEntry(format!("{:?}: {} is not a scalar", key, value.item_type()))
        })?;
        Ok(Self {
            ns,
            item_type: value.item_type(),
            span: 1,
            chunk: CHUNK_HEAD,
            key: key.to_string(),
            data,
        })
    }

    /// Head record of a fragment chain
    pub fn head(ns: u8, key: &str, item_type: ItemType, head: ChainHead) -> Self {
        let mut data = [0xFF; 8];
        let mut buf = &mut data[..];
        buf.put_u32_le(head.total_len);
        buf.put_u8(head.fragments);
        buf.put_u8(head.generation);
        Self {
            ns,
            item_type,
            span: 1,
            chunk: CHUNK_HEAD,
            key: key.to_string(),
            data,
        }
    }

    /// Header record of fragment `index`, spanning `span` slots
    pub fn fragment(
        ns: u8,
        key: &str,
        item_type: ItemType,
        index: u8,
        span: u8,
        header: FragmentHeader,
    ) -> Self {
        let mut data = [0u8; 8];
        let mut buf = &mut data[..];
        buf.put_u16_le(header.len);
        buf.put_u8(header.generation);
        buf.put_u8(header.next);
        buf.put_u32_le(header.data_crc);
        Self {
            ns,
            item_type,
            span,
            chunk: index,
            key: key.to_string(),
            data,
        }
    }

    /// Scalars and chain heads; fragments return false
    pub fn is_head(&self) -> bool {
        self.chunk == CHUNK_HEAD
    }

    /// Chain descriptor of a string/blob head
    pub fn chain_head(&self) -> Option<ChainHead> {
        if !self.is_head() || !self.item_type.is_variable() {
            return None;
        }
        let mut buf = &self.data[..];
        Some(ChainHead {
            total_len: buf.get_u32_le(),
            fragments: buf.get_u8(),
            generation: buf.get_u8(),
        })
    }

    /// Fragment descriptor of a fragment record
    pub fn fragment_header(&self) -> Option<FragmentHeader> {
        if self.is_head() {
            return None;
        }
        let mut buf = &self.data[..];
        Some(FragmentHeader {
            len: buf.get_u16_le(),
            generation: buf.get_u8(),
            next: buf.get_u8(),
            data_crc: buf.get_u32_le(),
        })
    }

    /// Inline value of a scalar record
    pub fn scalar_value(&self) -> Option<Value> {
        if !self.is_head() {
            return None;
        }
        Value::from_scalar_data(self.item_type, &self.data)
    }

    /// Encode into a record with its CRC filled in
    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut out = [0u8; ENTRY_SIZE];
        {
            let mut buf = &mut out[..];
            buf.put_u8(self.ns);
            buf.put_u8(self.item_type.tag());
            buf.put_u8(self.span);
            buf.put_u8(self.chunk);
            buf.put_u32_le(0); // CRC placeholder

            let mut key = [0u8; KEY_SIZE];
            let len = self.key.len().min(MAX_KEY_LEN);
            key[..len].copy_from_slice(&self.key.as_bytes()[..len]);
            buf.put_slice(&key);
            buf.put_slice(&self.data);
        }

        let crc = record_crc(&out);
        out[CRC_OFFSET..CRC_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        out
    }

    /// Decode and validate a record
    ///
    /// Fails with `CorruptEntry` on CRC mismatch, unknown type tag, zero
    /// span or a malformed key.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < ENTRY_SIZE {
            return Err(NvsError::CorruptEntry(format!(
                "record too short: {} bytes",
                bytes.len()
            )));
        }
        let record = &bytes[..ENTRY_SIZE];

        let mut buf = record;
        let ns = buf.get_u8();
        let tag = buf.get_u8();
        let span = buf.get_u8();
        let chunk = buf.get_u8();
        let stored_crc = buf.get_u32_le();

        let actual_crc = record_crc(record);
        if stored_crc != actual_crc {
            return Err(NvsError::CorruptEntry(format!(
                "CRC mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, actual_crc
            )));
        }

        let item_type = ItemType::from_tag(tag)
            .ok_or_else(|| NvsError::CorruptEntry(format!("unknown type tag {:#04x}", tag)))?;
        if span == 0 {
            return Err(NvsError::CorruptEntry("zero span".to_string()));
        }

        let key_field = &buf[..KEY_SIZE];
        let key_len = key_field.iter().position(|&b| b == 0).unwrap_or(KEY_SIZE);
        if key_len == 0 || key_len > MAX_KEY_LEN {
            return Err(NvsError::CorruptEntry("malformed key field".to_string()));
        }
        let key = std::str::from_utf8(&key_field[..key_len])
            .map_err(|_| NvsError::CorruptEntry("key is not valid UTF-8".to_string()))?
            .to_string();
        buf.advance(KEY_SIZE);

        let mut data = [0u8; 8];
        buf.copy_to_slice(&mut data);

        Ok(Self {
            ns,
            item_type,
            span,
            chunk,
            key,
            data,
        })
    }
}

/// CRC32 over a record, skipping the CRC field itself
fn record_crc(record: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&record[..CRC_OFFSET]);
    hasher.update(&record[CRC_OFFSET + 4..ENTRY_SIZE]);
    hasher.finalize()
}
