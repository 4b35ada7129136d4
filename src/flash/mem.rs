//! In-memory flash medium
//!
//! Simulates NOR flash in RAM. Completed writes land in a volatile image
//! and only reach the durable image on `sync()` (or immediately in
//! write-through mode). `power_cycle()` throws the volatile image away,
//! which is how tests model an abrupt power loss.

use parking_lot::Mutex;

use crate::error::{NvsError, Result};

use super::{layout_partitions, FlashMedium, PartitionRegion, ERASED_BYTE};

/// Pending fault armed on the medium
#[derive(Debug, Clone, Copy)]
enum Fault {
    /// Let this many more writes/erases succeed, then lose power
    AfterOps(u64),
    /// Lose power instead of performing the next erase
    OnErase,
}

struct FlashState {
    /// What a reader sees right now
    current: Vec<u8>,
    /// What survives a power cycle
    durable: Vec<u8>,
    write_through: bool,
    /// Power is lost: every access fails until `power_cycle`
    dead: bool,
    fault: Option<Fault>,
    writes: u64,
    erases: u64,
}

impl FlashState {
    /// Account for one mutating operation, firing an armed fault if due
    fn begin_mutation(&mut self, is_erase: bool) -> Result<()> {
        if self.dead {
            return Err(NvsError::medium("power lost"));
        }
        match self.fault {
            Some(Fault::AfterOps(0)) => {
                self.dead = true;
                self.fault = None;
                Err(NvsError::medium("power lost during write"))
            }
            Some(Fault::AfterOps(n)) => {
                self.fault = Some(Fault::AfterOps(n - 1));
                Ok(())
            }
            Some(Fault::OnErase) if is_erase => {
                self.dead = true;
                self.fault = None;
                Err(NvsError::medium("power lost before erase"))
            }
            _ => Ok(()),
        }
    }
}

/// RAM-backed flash medium with power-loss injection
pub struct MemFlash {
    sector_size: u32,
    partitions: Vec<PartitionRegion>,
    state: Mutex<FlashState>,
}

impl MemFlash {
    /// Create a medium builder
    pub fn builder() -> MemFlashBuilder {
        MemFlashBuilder::default()
    }

    /// Total size of the medium in bytes
    pub fn size(&self) -> usize {
        self.state.lock().current.len()
    }

    /// Drop every write not yet synced and restore power
    pub fn power_cycle(&self) {
        let mut state = self.state.lock();
        let durable = state.durable.clone();
        state.current = durable;
        state.dead = false;
        state.fault = None;
    }

    /// Let `ops` more writes/erases succeed, then lose power
    pub fn cut_power_after(&self, ops: u64) {
        self.state.lock().fault = Some(Fault::AfterOps(ops));
    }

    /// Lose power when the next erase is attempted
    pub fn cut_power_on_erase(&self) {
        self.state.lock().fault = Some(Fault::OnErase);
    }

    /// Whether power is currently lost
    pub fn is_powered_off(&self) -> bool {
        self.state.lock().dead
    }

    /// Flip bits at `offset` in both images (bypasses NOR semantics)
    pub fn corrupt(&self, offset: u32, xor: u8) {
        let mut state = self.state.lock();
        let i = offset as usize;
        state.current[i] ^= xor;
        state.durable[i] ^= xor;
    }

    /// Copy of the volatile image
    pub fn snapshot(&self) -> Vec<u8> {
        self.state.lock().current.clone()
    }

    /// Number of completed sector writes
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }

    /// Number of completed sector erases
    pub fn erase_count(&self) -> u64 {
        self.state.lock().erases
    }

    fn check_range(&self, len_total: usize, offset: u32, len: usize) -> Result<()> {
        let end = offset as usize + len;
        if end > len_total {
            return Err(NvsError::medium(format!(
                "access out of range: {}..{} (medium size {})",
                offset, end, len_total
            )));
        }
        Ok(())
    }
}

impl FlashMedium for MemFlash {
    fn read_sector(&self, offset: u32, len: usize) -> Result<Vec<u8>> {
        let state = self.state.lock();
        if state.dead {
            return Err(NvsError::medium("power lost"));
        }
        self.check_range(state.current.len(), offset, len)?;
        let start = offset as usize;
        Ok(state.current[start..start + len].to_vec())
    }

    fn write_sector(&self, offset: u32, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        self.check_range(state.current.len(), offset, data.len())?;
        state.begin_mutation(false)?;

        let start = offset as usize;
        let write_through = state.write_through;
        for (i, byte) in data.iter().enumerate() {
            state.current[start + i] &= *byte;
            if write_through {
                state.durable[start + i] &= *byte;
            }
        }
        state.writes += 1;
        Ok(())
    }

    fn erase_sector(&self, offset: u32) -> Result<()> {
        if offset % self.sector_size != 0 {
            return Err(NvsError::medium(format!(
                "erase offset {} not aligned to sector size {}",
                offset, self.sector_size
            )));
        }
        let mut state = self.state.lock();
        self.check_range(state.current.len(), offset, self.sector_size as usize)?;
        state.begin_mutation(true)?;

        let range = offset as usize..(offset + self.sector_size) as usize;
        state.current[range.clone()].fill(ERASED_BYTE);
        if state.write_through {
            state.durable[range].fill(ERASED_BYTE);
        }
        state.erases += 1;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        let mut state = self.state.lock();
        if state.dead {
            return Err(NvsError::medium("power lost"));
        }
        let FlashState { current, durable, .. } = &mut *state;
        durable.copy_from_slice(current);
        Ok(())
    }

    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn partitions(&self) -> Vec<PartitionRegion> {
        self.partitions.clone()
    }
}

/// Builder for MemFlash
///
/// Partitions are laid out back to back in the order they are added.
pub struct MemFlashBuilder {
    sector_size: u32,
    partitions: Vec<(String, u32)>,
    write_through: bool,
}

impl Default for MemFlashBuilder {
    fn default() -> Self {
        Self {
            sector_size: 4096,
            partitions: Vec::new(),
            write_through: false,
        }
    }
}

impl MemFlashBuilder {
    /// Set the erase unit size
    pub fn sector_size(mut self, size: u32) -> Self {
        self.sector_size = size;
        self
    }

    /// Add a partition spanning `sectors` erase units
    pub fn partition(mut self, name: impl Into<String>, sectors: u32) -> Self {
        self.partitions.push((name.into(), sectors));
        self
    }

    /// Make every write durable immediately
    pub fn write_through(mut self, enabled: bool) -> Self {
        self.write_through = enabled;
        self
    }

    /// Build the medium
    ///
    /// Fails with `NvsError::Config` when the layout overflows the
    /// 32-bit address space.
    pub fn build(self) -> Result<MemFlash> {
        if self.sector_size == 0 {
            return Err(NvsError::Config("sector size must be non-zero".to_string()));
        }
        let (partitions, offset) = layout_partitions(
            self.sector_size,
            self.partitions.iter().map(|(name, sectors)| (name.as_str(), *sectors)),
        )?;

        let image = vec![ERASED_BYTE; offset as usize];
        Ok(MemFlash {
            sector_size: self.sector_size,
            partitions,
            state: Mutex::new(FlashState {
                current: image.clone(),
                durable: image,
                write_through: self.write_through,
                dead: false,
                fault: None,
                writes: 0,
                erases: 0,
            }),
        })
    }
}
