//! File-backed flash medium
//!
//! Keeps a flash image in a regular file so data survives process
//! restarts. Writes keep NOR semantics (read-modify-AND-write).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::{NvsError, Result};

use super::{layout_partitions, FlashMedium, PartitionRegion, ERASED_BYTE};

/// Flash medium stored in an image file
pub struct FileFlash {
    path: PathBuf,
    sector_size: u32,
    size: u32,
    partitions: Vec<PartitionRegion>,
    file: Mutex<File>,
}

impl FileFlash {
    /// Open or create an image file holding the given partitions
    ///
    /// Partitions are laid out back to back, each `sectors` erase units
    /// long. A new (or shorter) file is extended with erased bytes.
    pub fn open(path: &Path, sector_size: u32, layout: &[(&str, u32)]) -> Result<Self> {
        if sector_size == 0 {
            return Err(NvsError::Config("sector size must be non-zero".to_string()));
        }

        let (partitions, offset) =
            layout_partitions(sector_size, layout.iter().map(|(name, sectors)| (*name, *sectors)))?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let existing = file.metadata()?.len();
        if existing < offset as u64 {
            file.seek(SeekFrom::Start(existing))?;
            let fill = vec![ERASED_BYTE; (offset as u64 - existing) as usize];
            file.write_all(&fill)?;
            file.sync_all()?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            sector_size,
            size: offset,
            partitions,
            file: Mutex::new(file),
        })
    }

    /// Path of the image file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_range(&self, offset: u32, len: usize) -> Result<()> {
        let end = offset as u64 + len as u64;
        if end > self.size as u64 {
            return Err(NvsError::medium(format!(
                "access out of range: {}..{} (image size {})",
                offset, end, self.size
            )));
        }
        Ok(())
    }
}

impl FlashMedium for FileFlash {
    fn read_sector(&self, offset: u32, len: usize) -> Result<Vec<u8>> {
        self.check_range(offset, len)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut buf = vec![0u8; len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_sector(&self, offset: u32, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;
        let mut file = self.file.lock();

        // NOR program: bits can only go from 1 to 0
        file.seek(SeekFrom::Start(offset as u64))?;
        let mut merged = vec![0u8; data.len()];
        file.read_exact(&mut merged)?;
        for (old, new) in merged.iter_mut().zip(data) {
            *old &= *new;
        }

        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&merged)?;
        Ok(())
    }

    fn erase_sector(&self, offset: u32) -> Result<()> {
        if offset % self.sector_size != 0 {
            return Err(NvsError::medium(format!(
                "erase offset {} not aligned to sector size {}",
                offset, self.sector_size
            )));
        }
        self.check_range(offset, self.sector_size as usize)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(&vec![ERASED_BYTE; self.sector_size as usize])?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn partitions(&self) -> Vec<PartitionRegion> {
        self.partitions.clone()
    }
}
