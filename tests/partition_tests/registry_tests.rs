//! Tests for PartitionRegistry and Partition
//!
//! These tests verify:
//! - Name resolution and PartitionNotFound
//! - Geometry validation
//! - Partition-relative, bounds-checked access

use std::sync::Arc;

use nvstore::flash::{FlashMedium, MemFlash, PartitionRegion};
use nvstore::partition::{Partition, PartitionRegistry, DEFAULT_PARTITION_NAME};
use nvstore::{NvsError, Result};

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_registry() -> (Arc<MemFlash>, PartitionRegistry) {
    let flash = Arc::new(
        MemFlash::builder()
            .sector_size(256)
            .partition("nvs", 4)
            .partition("factory", 2)
            .partition("tiny", 1)
            .build()
            .unwrap(),
    );
    let registry = PartitionRegistry::new(flash.clone());
    (flash, registry)
}

/// Medium with a hand-written partition table
struct TableMedium {
    inner: MemFlash,
    table: Vec<PartitionRegion>,
}

impl FlashMedium for TableMedium {
    fn read_sector(&self, offset: u32, len: usize) -> Result<Vec<u8>> {
        self.inner.read_sector(offset, len)
    }

    fn write_sector(&self, offset: u32, data: &[u8]) -> Result<()> {
        self.inner.write_sector(offset, data)
    }

    fn erase_sector(&self, offset: u32) -> Result<()> {
        self.inner.erase_sector(offset)
    }

    fn sync(&self) -> Result<()> {
        self.inner.sync()
    }

    fn sector_size(&self) -> u32 {
        self.inner.sector_size()
    }

    fn partitions(&self) -> Vec<PartitionRegion> {
        self.table.clone()
    }
}

fn registry_with_region(region: PartitionRegion) -> PartitionRegistry {
    let medium = TableMedium {
        inner: MemFlash::builder().sector_size(256).partition("raw", 16).build().unwrap(),
        table: vec![region],
    };
    PartitionRegistry::new(Arc::new(medium))
}

// =============================================================================
// Resolution Tests
// =============================================================================

#[test]
fn test_default_partition_name() {
    assert_eq!(DEFAULT_PARTITION_NAME, "nvs");
}

#[test]
fn test_resolve_known_partition() {
    let (_flash, registry) = setup_registry();

    let region = registry.resolve("factory").unwrap();
    assert_eq!(region.offset, 1024);
    assert_eq!(region.size, 512);
    assert_eq!(region.page_size, 256);
}

#[test]
fn test_resolve_unknown_partition() {
    let (_flash, registry) = setup_registry();

    let result = registry.resolve("missing");
    assert!(matches!(result, Err(NvsError::PartitionNotFound(name)) if name == "missing"));
}

#[test]
fn test_names_lists_every_partition() {
    let (_flash, registry) = setup_registry();
    assert_eq!(registry.names(), vec!["nvs", "factory", "tiny"]);
}

#[test]
fn test_single_page_partition_rejected() {
    let (_flash, registry) = setup_registry();

    let result = registry.resolve("tiny");
    assert!(matches!(result, Err(NvsError::Config(_))));
}

#[test]
fn test_bad_page_size_rejected() {
    let registry = registry_with_region(PartitionRegion {
        name: "odd".to_string(),
        offset: 0,
        size: 1000,
        page_size: 100,
    });
    assert!(matches!(registry.resolve("odd"), Err(NvsError::Config(_))));

    let registry = registry_with_region(PartitionRegion {
        name: "small".to_string(),
        offset: 0,
        size: 1024,
        page_size: 128,
    });
    assert!(matches!(registry.resolve("small"), Err(NvsError::Config(_))));
}

#[test]
fn test_unaligned_region_rejected() {
    let registry = registry_with_region(PartitionRegion {
        name: "skewed".to_string(),
        offset: 100,
        size: 1024,
        page_size: 256,
    });
    assert!(matches!(registry.resolve("skewed"), Err(NvsError::Config(_))));
}

#[test]
fn test_region_past_address_space_rejected() {
    let registry = registry_with_region(PartitionRegion {
        name: "wrap".to_string(),
        offset: u32::MAX - 255,
        size: 1024,
        page_size: 256,
    });
    assert!(matches!(registry.resolve("wrap"), Err(NvsError::Config(_))));
}

#[test]
fn test_resolve_never_writes() {
    let (flash, registry) = setup_registry();

    registry.resolve("nvs").unwrap();
    let _ = registry.resolve("missing");
    registry.open("factory").unwrap();

    assert_eq!(flash.write_count(), 0);
    assert_eq!(flash.erase_count(), 0);
}

// =============================================================================
// Partition View Tests
// =============================================================================

#[test]
fn test_partition_offsets_are_relative() {
    let (flash, registry) = setup_registry();
    let partition = registry.open("factory").unwrap();

    partition.write(0, &[0xAB]).unwrap();

    assert_eq!(flash.read_sector(1024, 1).unwrap(), vec![0xAB]);
    assert_eq!(partition.read(0, 1).unwrap(), vec![0xAB]);
    assert_eq!(partition.page_count(), 2);
    assert_eq!(partition.name(), "factory");
}

#[test]
fn test_partition_bounds_checked() {
    let (flash, registry) = setup_registry();
    let partition = registry.open("nvs").unwrap();

    assert!(matches!(partition.read(1020, 8), Err(NvsError::MediumIo(_))));
    assert!(partition.write(1024, &[0]).is_err());
    assert!(partition.erase_page(4).is_err());

    // The neighbouring partition is untouched
    assert_eq!(flash.read_sector(1024, 1).unwrap(), vec![0xFF]);
}

#[test]
fn test_unvalidated_region_access_does_not_wrap() {
    let flash = Arc::new(MemFlash::builder().sector_size(256).partition("nvs", 4).build().unwrap());
    let partition = Partition::new(
        flash.clone(),
        PartitionRegion {
            name: "wrap".to_string(),
            offset: u32::MAX - 255,
            size: 1024,
            page_size: 256,
        },
    );

    assert!(matches!(partition.read(512, 4), Err(NvsError::MediumIo(_))));
    assert!(matches!(partition.write(512, &[0]), Err(NvsError::MediumIo(_))));
    assert!(matches!(partition.erase_page(3), Err(NvsError::MediumIo(_))));
    assert_eq!(flash.write_count(), 0);
}

#[test]
fn test_erase_page_and_erase_all() {
    let (_flash, registry) = setup_registry();
    let partition = registry.open("nvs").unwrap();

    partition.write(0, &[0u8; 4]).unwrap();
    partition.write(300, &[0u8; 4]).unwrap();

    partition.erase_page(0).unwrap();
    assert_eq!(partition.read(0, 4).unwrap(), vec![0xFF; 4]);
    assert_eq!(partition.read(300, 4).unwrap(), vec![0u8; 4]);

    partition.erase_all().unwrap();
    assert!(partition.read(0, 1024).unwrap().iter().all(|&b| b == 0xFF));
}
