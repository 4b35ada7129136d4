//! Tests for the entry codec
//!
//! These tests verify:
//! - Type tags and their parsing
//! - Scalar encoding (little-endian, 0xFF padding)
//! - Record encode/decode and CRC validation
//! - Chain head and fragment descriptors
//! - Key validation

use nvstore::entry::{
    validate_key, ChainHead, Entry, FragmentHeader, ItemType, Value, CHAIN_END, CHUNK_HEAD,
    ENTRY_SIZE,
};
use nvstore::NvsError;

// =============================================================================
// Helper Functions
// =============================================================================

fn all_types() -> Vec<ItemType> {
    vec![
        ItemType::U8,
        ItemType::I8,
        ItemType::U16,
        ItemType::I16,
        ItemType::U32,
        ItemType::I32,
        ItemType::U64,
        ItemType::I64,
        ItemType::Str,
        ItemType::Blob,
    ]
}

// =============================================================================
// Type Tag Tests
// =============================================================================

#[test]
fn test_type_tags_parse_back() {
    for item_type in all_types() {
        assert_eq!(ItemType::from_tag(item_type.tag()), Some(item_type));
    }
}

#[test]
fn test_unknown_tag_rejected() {
    assert_eq!(ItemType::from_tag(0x00), None);
    assert_eq!(ItemType::from_tag(0xFF), None);
    assert_eq!(ItemType::from_tag(0x03), None);
}

#[test]
fn test_type_widths() {
    assert_eq!(ItemType::U8.width(), 1);
    assert_eq!(ItemType::I16.width(), 2);
    assert_eq!(ItemType::U32.width(), 4);
    assert_eq!(ItemType::I64.width(), 8);
    assert_eq!(ItemType::Blob.width(), 0);
    assert!(ItemType::Str.is_variable());
    assert!(!ItemType::U64.is_variable());
}

#[test]
fn test_type_display() {
    assert_eq!(ItemType::I32.to_string(), "i32");
    assert_eq!(ItemType::Str.to_string(), "str");
    assert_eq!(ItemType::Blob.to_string(), "blob");
}

// =============================================================================
// Scalar Data Tests
// =============================================================================

#[test]
fn test_scalar_data_little_endian_padded() {
    let data = Value::U16(0x1234).scalar_data().unwrap();
    assert_eq!(data, [0x34, 0x12, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);

    let data = Value::I8(-1).scalar_data().unwrap();
    assert_eq!(data[0], 0xFF);
}

#[test]
fn test_scalar_data_extremes() {
    let values = vec![
        Value::U8(u8::MAX),
        Value::I8(i8::MIN),
        Value::U16(u16::MAX),
        Value::I16(i16::MIN),
        Value::U32(u32::MAX),
        Value::I32(i32::MIN),
        Value::U64(u64::MAX),
        Value::I64(i64::MIN),
    ];

    for value in values {
        let data = value.scalar_data().unwrap();
        let back = Value::from_scalar_data(value.item_type(), &data).unwrap();
        assert_eq!(back, value);
    }
}

#[test]
fn test_variable_values_have_no_scalar_data() {
    assert!(Value::Str("x".to_string()).scalar_data().is_none());
    assert!(Value::Blob(vec![1]).scalar_data().is_none());
    assert_eq!(Value::Blob(vec![1, 2]).payload(), Some(&[1u8, 2][..]));
    assert_eq!(Value::U8(1).payload(), None);
}

#[test]
fn test_from_payload_rejects_invalid_utf8() {
    let result = Value::from_payload(ItemType::Str, "name", vec![0xC3, 0x28]);
    assert!(matches!(result, Err(NvsError::CorruptEntry(_))));

    let blob = Value::from_payload(ItemType::Blob, "raw", vec![0xC3, 0x28]).unwrap();
    assert_eq!(blob, Value::Blob(vec![0xC3, 0x28]));
}

// =============================================================================
// Record Encode / Decode Tests
// =============================================================================

#[test]
fn test_scalar_record_layout() {
    let entry = Entry::scalar(3, "retries", &Value::I32(3)).unwrap();
    let bytes = entry.encode();

    assert_eq!(bytes.len(), ENTRY_SIZE);
    assert_eq!(bytes[0], 3);
    assert_eq!(bytes[1], ItemType::I32.tag());
    assert_eq!(bytes[2], 1);
    assert_eq!(bytes[3], CHUNK_HEAD);
    assert_eq!(&bytes[8..15], b"retries");
    assert_eq!(bytes[15], 0);
    assert_eq!(&bytes[24..28], &3i32.to_le_bytes());
}

#[test]
fn test_scalar_record_decodes() {
    let entry = Entry::scalar(1, "level", &Value::U8(7)).unwrap();
    let decoded = Entry::decode(&entry.encode()).unwrap();

    assert_eq!(decoded, entry);
    assert!(decoded.is_head());
    assert_eq!(decoded.scalar_value(), Some(Value::U8(7)));
    assert_eq!(decoded.chain_head(), None);
}

#[test]
fn test_scalar_constructor_rejects_strings() {
    let result = Entry::scalar(1, "s", &Value::Str("x".to_string()));
    assert!(result.is_err());
}

#[test]
fn test_max_length_key_survives() {
    let key = "abcdefghijklmno";
    let entry = Entry::scalar(1, key, &Value::U64(42)).unwrap();
    let decoded = Entry::decode(&entry.encode()).unwrap();
    assert_eq!(decoded.key, key);
}

#[test]
fn test_flipped_bit_fails_crc() {
    let entry = Entry::scalar(1, "level", &Value::U32(1000)).unwrap();

    for position in [0, 1, 3, 10, 24, 31] {
        let mut bytes = entry.encode();
        bytes[position] ^= 0x01;
        let result = Entry::decode(&bytes);
        assert!(
            matches!(result, Err(NvsError::CorruptEntry(_))),
            "bit flip at {} not detected",
            position
        );
    }
}

#[test]
fn test_erased_record_is_corrupt() {
    let result = Entry::decode(&[0xFF; ENTRY_SIZE]);
    assert!(matches!(result, Err(NvsError::CorruptEntry(_))));
}

#[test]
fn test_short_record_is_corrupt() {
    let result = Entry::decode(&[0u8; 10]);
    assert!(matches!(result, Err(NvsError::CorruptEntry(_))));
}

// =============================================================================
// Chain Descriptor Tests
// =============================================================================

#[test]
fn test_chain_head_descriptor() {
    let chain = ChainHead {
        total_len: 8192,
        fragments: 3,
        generation: 9,
    };
    let entry = Entry::head(2, "img", ItemType::Blob, chain);
    let decoded = Entry::decode(&entry.encode()).unwrap();

    assert!(decoded.is_head());
    assert_eq!(decoded.chain_head(), Some(chain));
    assert_eq!(decoded.fragment_header(), None);
    assert_eq!(decoded.scalar_value(), None);
}

#[test]
fn test_fragment_descriptor() {
    let header = FragmentHeader {
        len: 100,
        generation: 4,
        next: CHAIN_END,
        data_crc: crc32fast::hash(b"payload"),
    };
    let entry = Entry::fragment(2, "img", ItemType::Blob, 0, 5, header);
    let decoded = Entry::decode(&entry.encode()).unwrap();

    assert!(!decoded.is_head());
    assert_eq!(decoded.chunk, 0);
    assert_eq!(decoded.span, 5);
    assert_eq!(decoded.fragment_header(), Some(header));
    assert_eq!(decoded.chain_head(), None);
}

// =============================================================================
// Key Validation Tests
// =============================================================================

#[test]
fn test_validate_key() {
    assert!(validate_key("a").is_ok());
    assert!(validate_key("abcdefghijklmno").is_ok());

    assert!(matches!(validate_key(""), Err(NvsError::InvalidName(_))));
    assert!(matches!(
        validate_key("abcdefghijklmnop"),
        Err(NvsError::InvalidName(_))
    ));
    assert!(matches!(validate_key("a\0b"), Err(NvsError::InvalidName(_))));
}
