//! Flash Medium Module
//!
//! The storage engine never touches hardware directly: it consumes a
//! medium exposing sector read/write/erase plus a partition table.
//!
//! ## Responsibilities
//! - Sector reads and NOR-style writes (bits can only be cleared)
//! - Sector erase (every byte back to 0xFF)
//! - A sync barrier pushing buffered writes to durable state
//! - Partition metadata lookup
//!
//! ## Media
//! - `MemFlash`: RAM image with a volatile write buffer and power-loss
//!   injection, used by tests and host tooling
//! - `FileFlash`: flash image persisted in a regular file

mod file;
mod mem;

pub use file::FileFlash;
pub use mem::{MemFlash, MemFlashBuilder};

use crate::error::{NvsError, Result};

/// Value of an erased flash byte
pub const ERASED_BYTE: u8 = 0xFF;

/// Physical region of the medium backing one partition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRegion {
    /// Partition label
    pub name: String,
    /// Absolute offset of the first byte on the medium
    pub offset: u32,
    /// Region size in bytes
    pub size: u32,
    /// Erase unit (one store page)
    pub page_size: u32,
}

impl PartitionRegion {
    /// Number of whole pages in the region
    pub fn page_count(&self) -> usize {
        if self.page_size == 0 {
            return 0;
        }
        (self.size / self.page_size) as usize
    }
}

/// Lay partitions out back to back from offset 0
///
/// Returns the regions and the total medium size. Fails with
/// `NvsError::Config` when the layout does not fit a 32-bit address space.
pub(crate) fn layout_partitions<'a, I>(sector_size: u32, layout: I) -> Result<(Vec<PartitionRegion>, u32)>
where
    I: IntoIterator<Item = (&'a str, u32)>,
{
    let mut offset = 0u32;
    let mut partitions = Vec::new();
    for (name, sectors) in layout {
        let size = sectors.checked_mul(sector_size).ok_or_else(|| {
            NvsError::Config(format!(
                "partition {}: {} sectors of {} bytes overflow the address space",
                name, sectors, sector_size
            ))
        })?;
        partitions.push(PartitionRegion {
            name: name.to_string(),
            offset,
            size,
            page_size: sector_size,
        });
        offset = offset.checked_add(size).ok_or_else(|| {
            NvsError::Config(format!("partition {} ends beyond the address space", name))
        })?;
    }
    Ok((partitions, offset))
}

/// Contract of the underlying flash device
///
/// All methods take `&self`: a medium is shared by every partition store
/// built on top of it and synchronizes internally.
pub trait FlashMedium: Send + Sync {
    /// Read `len` bytes starting at absolute `offset`
    fn read_sector(&self, offset: u32, len: usize) -> Result<Vec<u8>>;

    /// Program bytes at absolute `offset`
    ///
    /// Write-once-per-erase semantics: the stored byte becomes
    /// `old & new`, so a write can only clear bits.
    fn write_sector(&self, offset: u32, data: &[u8]) -> Result<()>;

    /// Erase the sector starting at absolute `offset`
    fn erase_sector(&self, offset: u32) -> Result<()>;

    /// Force every completed write/erase to durable state
    fn sync(&self) -> Result<()>;

    /// Erase unit size in bytes
    fn sector_size(&self) -> u32;

    /// All partitions provisioned on this medium
    fn partitions(&self) -> Vec<PartitionRegion>;

    /// Look up a partition by label
    fn partition_region(&self, name: &str) -> Option<PartitionRegion> {
        self.partitions().into_iter().find(|p| p.name == name)
    }
}
