//! Tests for Handle
//!
//! These tests verify:
//! - Typed get/set for every storable type
//! - Staged writes: visible to the same handle, invisible elsewhere until commit
//! - Read-only enforcement and the per-namespace write lock
//! - Erase, erase_all, key listing
//! - Close semantics (idempotent, releases lock, discards staged writes)

use std::sync::Arc;

use nvstore::config::Config;
use nvstore::entry::ItemType;
use nvstore::flash::MemFlash;
use nvstore::partition::PartitionRegistry;
use nvstore::storage::{EntryInfo, PartitionStore};
use nvstore::{Handle, NvsError, OpenMode};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_store_with(config: Config) -> (Arc<MemFlash>, Arc<PartitionStore>) {
    let flash = Arc::new(MemFlash::builder().sector_size(4096).partition("nvs", 4).build().unwrap());
    let partition = PartitionRegistry::new(flash.clone()).open("nvs").unwrap();
    let store = Arc::new(PartitionStore::open(partition, config).unwrap());
    (flash, store)
}

fn setup_store() -> (Arc<MemFlash>, Arc<PartitionStore>) {
    setup_store_with(Config::default())
}

fn writer(store: &Arc<PartitionStore>, namespace: &str) -> Handle {
    Handle::open(Arc::clone(store), namespace, OpenMode::ReadWrite).unwrap()
}

fn reader(store: &Arc<PartitionStore>, namespace: &str) -> Handle {
    Handle::open(Arc::clone(store), namespace, OpenMode::ReadOnly).unwrap()
}

// =============================================================================
// Typed Access Tests
// =============================================================================

#[test]
fn test_every_type_round_trips() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "types");
    h.set_i8("i8", -8).unwrap();
    h.set_u8("u8", 8).unwrap();
    h.set_i16("i16", -1600).unwrap();
    h.set_u16("u16", 1600).unwrap();
    h.set_i32("i32", -320_000).unwrap();
    h.set_u32("u32", 320_000).unwrap();
    h.set_i64("i64", -64_000_000_000).unwrap();
    h.set_u64("u64", 64_000_000_000).unwrap();
    h.set_str("str", "text value").unwrap();
    h.set_blob("blob", &[0, 1, 2, 255]).unwrap();
    h.commit().unwrap();
    h.close().unwrap();

    let r = reader(&store, "types");
    assert_eq!(r.get_i8("i8").unwrap(), -8);
    assert_eq!(r.get_u8("u8").unwrap(), 8);
    assert_eq!(r.get_i16("i16").unwrap(), -1600);
    assert_eq!(r.get_u16("u16").unwrap(), 1600);
    assert_eq!(r.get_i32("i32").unwrap(), -320_000);
    assert_eq!(r.get_u32("u32").unwrap(), 320_000);
    assert_eq!(r.get_i64("i64").unwrap(), -64_000_000_000);
    assert_eq!(r.get_u64("u64").unwrap(), 64_000_000_000);
    assert_eq!(r.get_str("str").unwrap(), "text value");
    assert_eq!(r.get_blob("blob").unwrap(), vec![0, 1, 2, 255]);
}

#[test]
fn test_generic_accessors() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "gen");
    h.set("count", 5u16).unwrap();
    h.set("label", "x".to_string()).unwrap();

    assert_eq!(h.get::<u16>("count").unwrap(), 5);
    assert_eq!(h.get::<String>("label").unwrap(), "x");
    assert!(matches!(h.get::<u32>("count"), Err(NvsError::TypeMismatch { .. })));
}

#[test]
fn test_get_missing_key() {
    let (_flash, store) = setup_store();

    let h = writer(&store, "app");
    let result = h.get_i32("missing");

    assert!(matches!(result, Err(NvsError::KeyNotFound(key)) if key == "missing"));
}

#[test]
fn test_type_mismatch_on_staged_value() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "app");
    h.set_u8("level", 3).unwrap();

    match h.get_u16("level") {
        Err(NvsError::TypeMismatch { expected, found, .. }) => {
            assert_eq!(expected, ItemType::U16);
            assert_eq!(found, ItemType::U8);
        }
        other => panic!("expected TypeMismatch, got {:?}", other),
    }
}

#[test]
fn test_type_mismatch_on_stored_value() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "app");
    h.set_str("mode", "fast").unwrap();
    h.commit().unwrap();

    assert!(matches!(h.get_blob("mode"), Err(NvsError::TypeMismatch { .. })));
    assert!(matches!(h.get_i32("mode"), Err(NvsError::TypeMismatch { .. })));
}

#[test]
fn test_invalid_key_rejected() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "app");

    assert!(matches!(h.set_u8("", 1), Err(NvsError::InvalidName(_))));
    assert!(matches!(
        h.set_u8("sixteen_chars_xx", 1),
        Err(NvsError::InvalidName(_))
    ));
    assert_eq!(h.pending_writes(), 0);
}

#[test]
fn test_value_too_large_rejected_early() {
    let (_flash, store) = setup_store_with(Config::builder().max_value_size(16).build());

    let mut h = writer(&store, "app");
    let result = h.set_blob("big", &[0; 17]);

    assert!(matches!(result, Err(NvsError::ValueTooLarge { len: 17, max: 16 })));
    assert_eq!(h.pending_writes(), 0);
}

// =============================================================================
// Staging / Commit Tests
// =============================================================================

#[test]
fn test_staged_writes_visible_to_own_handle() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "app");
    h.set_u32("a", 1).unwrap();
    h.set_u32("a", 2).unwrap();

    assert_eq!(h.get_u32("a").unwrap(), 2);
    assert_eq!(h.pending_writes(), 2);
}

#[test]
fn test_staged_writes_invisible_until_commit() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "app");
    h.set_u32("a", 1).unwrap();

    let r = reader(&store, "app");
    assert!(matches!(r.get_u32("a"), Err(NvsError::KeyNotFound(_))));

    h.commit().unwrap();
    assert_eq!(r.get_u32("a").unwrap(), 1);
    assert_eq!(h.pending_writes(), 0);
}

#[test]
fn test_commit_is_durable() {
    let (flash, store) = setup_store();

    let mut h = writer(&store, "app");
    h.set_str("name", "node").unwrap();
    h.commit().unwrap();
    h.close().unwrap();
    drop(store);

    flash.power_cycle();
    let partition = PartitionRegistry::new(flash.clone()).open("nvs").unwrap();
    let store = Arc::new(PartitionStore::open(partition, Config::default()).unwrap());

    assert_eq!(reader(&store, "app").get_str("name").unwrap(), "node");
}

#[test]
fn test_close_discards_staged_writes() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "app");
    h.set_u8("a", 1).unwrap();
    h.close().unwrap();

    let r = reader(&store, "app");
    assert!(matches!(r.get_u8("a"), Err(NvsError::KeyNotFound(_))));
}

#[test]
fn test_commit_applies_in_call_order() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "app");
    h.set_u8("a", 1).unwrap();
    h.erase_key("a").unwrap();
    h.set_u8("a", 3).unwrap();
    h.set_u8("b", 4).unwrap();
    h.erase_key("b").unwrap();
    h.commit().unwrap();

    let r = reader(&store, "app");
    assert_eq!(r.get_u8("a").unwrap(), 3);
    assert!(matches!(r.get_u8("b"), Err(NvsError::KeyNotFound(_))));
}

// =============================================================================
// Erase Tests
// =============================================================================

#[test]
fn test_erase_key() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "app");
    h.set_i64("gone", 1).unwrap();
    h.commit().unwrap();

    h.erase_key("gone").unwrap();
    assert!(matches!(h.get_i64("gone"), Err(NvsError::KeyNotFound(_))));
    h.commit().unwrap();

    let r = reader(&store, "app");
    assert!(matches!(r.get_i64("gone"), Err(NvsError::KeyNotFound(_))));
}

#[test]
fn test_erase_missing_key() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "app");

    assert!(matches!(h.erase_key("never"), Err(NvsError::KeyNotFound(_))));

    h.set_u8("staged", 1).unwrap();
    h.erase_key("staged").unwrap();
    assert!(matches!(h.erase_key("staged"), Err(NvsError::KeyNotFound(_))));
}

#[test]
fn test_erase_all() {
    let (_flash, store) = setup_store();

    let mut other = writer(&store, "other");
    other.set_u8("x", 1).unwrap();
    other.commit().unwrap();

    let mut h = writer(&store, "app");
    h.set_u8("a", 1).unwrap();
    h.set_str("b", "two").unwrap();
    h.commit().unwrap();

    h.erase_all().unwrap();
    assert!(matches!(h.get_u8("a"), Err(NvsError::KeyNotFound(_))));
    h.set_u8("c", 3).unwrap();
    h.commit().unwrap();

    let r = reader(&store, "app");
    assert!(matches!(r.get_u8("a"), Err(NvsError::KeyNotFound(_))));
    assert!(matches!(r.get_str("b"), Err(NvsError::KeyNotFound(_))));
    assert_eq!(r.get_u8("c").unwrap(), 3);
    assert_eq!(reader(&store, "other").get_u8("x").unwrap(), 1);
}

// =============================================================================
// Key Listing Tests
// =============================================================================

#[test]
fn test_keys_include_staged_writes() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "app");
    h.set_u8("b", 1).unwrap();
    h.set_str("a", "x").unwrap();
    h.commit().unwrap();

    h.erase_key("b").unwrap();
    h.set_blob("c", &[1]).unwrap();

    assert_eq!(
        h.keys().unwrap(),
        vec![
            EntryInfo { key: "a".to_string(), item_type: ItemType::Str },
            EntryInfo { key: "c".to_string(), item_type: ItemType::Blob },
        ]
    );

    // Another handle only sees committed keys
    let keys: Vec<String> = reader(&store, "app")
        .keys()
        .unwrap()
        .into_iter()
        .map(|info| info.key)
        .collect();
    assert_eq!(keys, vec!["a", "b"]);
}

// =============================================================================
// Mode / Lock Tests
// =============================================================================

#[test]
fn test_read_only_rejects_writes() {
    let (_flash, store) = setup_store();
    writer(&store, "app").close().unwrap();

    let mut r = reader(&store, "app");

    assert!(matches!(r.set_u8("a", 1), Err(NvsError::ReadOnlyViolation)));
    assert!(matches!(r.set_str("a", "x"), Err(NvsError::ReadOnlyViolation)));
    assert!(matches!(r.erase_key("a"), Err(NvsError::ReadOnlyViolation)));
    assert!(matches!(r.erase_all(), Err(NvsError::ReadOnlyViolation)));
    assert!(r.commit().is_ok());
}

#[test]
fn test_read_only_unknown_namespace() {
    let (_flash, store) = setup_store();

    let result = Handle::open(Arc::clone(&store), "nowhere", OpenMode::ReadOnly);

    assert!(matches!(result, Err(NvsError::NamespaceNotFound(_))));
    assert!(store.namespaces().unwrap().is_empty());
}

#[test]
fn test_read_write_creates_namespace() {
    let (_flash, store) = setup_store();

    let h = writer(&store, "fresh");

    assert_eq!(h.namespace(), "fresh");
    assert_eq!(h.namespace_id(), 1);
    assert_eq!(h.partition(), "nvs");
    assert_eq!(h.mode(), OpenMode::ReadWrite);
    assert_eq!(store.resolve_namespace("fresh", false).unwrap(), 1);
}

#[test]
fn test_second_writer_denied() {
    let (_flash, store) = setup_store();

    let mut first = writer(&store, "app");
    let second = Handle::open(Arc::clone(&store), "app", OpenMode::ReadWrite);
    assert!(matches!(second, Err(NvsError::AccessDenied(_))));

    // Readers and writers on other namespaces are unaffected
    assert!(Handle::open(Arc::clone(&store), "app", OpenMode::ReadOnly).is_ok());
    assert!(Handle::open(Arc::clone(&store), "other", OpenMode::ReadWrite).is_ok());

    first.close().unwrap();
    assert!(Handle::open(Arc::clone(&store), "app", OpenMode::ReadWrite).is_ok());
}

#[test]
fn test_drop_releases_lock() {
    let (_flash, store) = setup_store();

    {
        let mut h = writer(&store, "app");
        h.set_u8("a", 1).unwrap();
    }

    let h = writer(&store, "app");
    assert!(matches!(h.get_u8("a"), Err(NvsError::KeyNotFound(_))));
    assert_eq!(store.open_handles(), 1);
}

// =============================================================================
// Close Tests
// =============================================================================

#[test]
fn test_close_is_idempotent() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "app");
    h.close().unwrap();
    h.close().unwrap();

    assert!(!h.is_open());
    assert_eq!(store.open_handles(), 0);
    assert!(!store.is_locked(h.namespace_id()));
}

#[test]
fn test_closed_handle_rejects_everything() {
    let (_flash, store) = setup_store();

    let mut h = writer(&store, "app");
    h.close().unwrap();

    assert!(matches!(h.get_u8("a"), Err(NvsError::HandleClosed)));
    assert!(matches!(h.set_u8("a", 1), Err(NvsError::HandleClosed)));
    assert!(matches!(h.erase_key("a"), Err(NvsError::HandleClosed)));
    assert!(matches!(h.commit(), Err(NvsError::HandleClosed)));
    assert!(matches!(h.keys(), Err(NvsError::HandleClosed)));
}

#[test]
fn test_open_handle_count() {
    let (_flash, store) = setup_store();

    let mut a = writer(&store, "a");
    let b = reader(&store, "a");
    assert_eq!(store.open_handles(), 2);

    a.close().unwrap();
    assert_eq!(store.open_handles(), 1);
    drop(b);
    assert_eq!(store.open_handles(), 0);
}
