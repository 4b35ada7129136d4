//! Partition Registry
//!
//! Name → region resolution over the medium's partition table.

use std::fmt;
use std::sync::Arc;

use crate::error::{NvsError, Result};
use crate::flash::{FlashMedium, PartitionRegion};
use crate::storage::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};

/// Resolves partition names against the medium's partition table
///
/// Read-only: resolution never writes to the medium.
#[derive(Clone)]
pub struct PartitionRegistry {
    medium: Arc<dyn FlashMedium>,
}

impl PartitionRegistry {
    /// Create a registry over a medium
    pub fn new(medium: Arc<dyn FlashMedium>) -> Self {
        Self { medium }
    }

    /// Resolve a partition name to its region descriptor
    ///
    /// Fails with `PartitionNotFound` for unknown names and with `Config`
    /// when the region cannot hold a page store.
    pub fn resolve(&self, name: &str) -> Result<PartitionRegion> {
        let region = self
            .medium
            .partition_region(name)
            .ok_or_else(|| NvsError::PartitionNotFound(name.to_string()))?;

        Self::validate(&region)?;
        Ok(region)
    }

    /// Open a partition-relative view of a named partition
    pub fn open(&self, name: &str) -> Result<Partition> {
        let region = self.resolve(name)?;
        Ok(Partition::new(Arc::clone(&self.medium), region))
    }

    /// Names of all partitions on the medium
    pub fn names(&self) -> Vec<String> {
        self.medium.partitions().into_iter().map(|p| p.name).collect()
    }

    fn validate(region: &PartitionRegion) -> Result<()> {
        let ps = region.page_size;
        if ps % 32 != 0 || !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&ps) {
            return Err(NvsError::Config(format!(
                "partition {}: page size {} must be a multiple of 32 in {}..={}",
                region.name, ps, MIN_PAGE_SIZE, MAX_PAGE_SIZE
            )));
        }
        if region.offset % ps != 0 || region.size % ps != 0 {
            return Err(NvsError::Config(format!(
                "partition {}: offset {} / size {} not page aligned",
                region.name, region.offset, region.size
            )));
        }
        if region.offset.checked_add(region.size).is_none() {
            return Err(NvsError::Config(format!(
                "partition {}: offset {} + size {} overflows the address space",
                region.name, region.offset, region.size
            )));
        }
        if region.page_count() < 2 {
            return Err(NvsError::Config(format!(
                "partition {}: needs at least 2 pages, has {}",
                region.name,
                region.page_count()
            )));
        }
        Ok(())
    }
}

/// Partition-relative, bounds-checked view of the medium
#[derive(Clone)]
pub struct Partition {
    medium: Arc<dyn FlashMedium>,
    region: PartitionRegion,
}

impl Partition {
    pub fn new(medium: Arc<dyn FlashMedium>, region: PartitionRegion) -> Self {
        Self { medium, region }
    }

    /// Partition label
    pub fn name(&self) -> &str {
        &self.region.name
    }

    /// Region descriptor
    pub fn region(&self) -> &PartitionRegion {
        &self.region
    }

    /// Page (erase unit) size in bytes
    pub fn page_size(&self) -> u32 {
        self.region.page_size
    }

    /// Number of pages in the partition
    pub fn page_count(&self) -> usize {
        self.region.page_count()
    }

    /// Read `len` bytes at a partition-relative offset
    pub fn read(&self, offset: u32, len: usize) -> Result<Vec<u8>> {
        let absolute = self.locate(offset, len)?;
        self.medium.read_sector(absolute, len)
    }

    /// Program bytes at a partition-relative offset
    pub fn write(&self, offset: u32, data: &[u8]) -> Result<()> {
        let absolute = self.locate(offset, data.len())?;
        self.medium.write_sector(absolute, data)
    }

    /// Erase page `index`
    pub fn erase_page(&self, index: usize) -> Result<()> {
        let offset = u32::try_from(index)
            .ok()
            .and_then(|i| i.checked_mul(self.region.page_size))
            .ok_or_else(|| {
                NvsError::medium(format!("partition {}: page {} out of range", self.region.name, index))
            })?;
        let absolute = self.locate(offset, self.region.page_size as usize)?;
        self.medium.erase_sector(absolute)
    }

    /// Erase every page of the partition
    pub fn erase_all(&self) -> Result<()> {
        for index in 0..self.page_count() {
            self.erase_page(index)?;
        }
        Ok(())
    }

    /// Durability barrier on the medium
    pub fn sync(&self) -> Result<()> {
        self.medium.sync()
    }

    /// Bounds-check a partition-relative range and return its absolute offset
    fn locate(&self, offset: u32, len: usize) -> Result<u32> {
        let end = offset as u64 + len as u64;
        if end > self.region.size as u64 {
            return Err(NvsError::medium(format!(
                "partition {}: access {}..{} beyond size {}",
                self.region.name, offset, end, self.region.size
            )));
        }
        self.region.offset.checked_add(offset).ok_or_else(|| {
            NvsError::medium(format!(
                "partition {}: offset {} overflows the address space",
                self.region.name, offset
            ))
        })
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition").field("region", &self.region).finish()
    }
}
