//! Page
//!
//! One erasable unit of the page store: header, entry-state bitmap and a
//! run of 32-byte slots. All state transitions only clear bits, so they
//! can be programmed in place without an erase.

use bytes::{Buf, BufMut};
use tracing::warn;

use crate::entry::{Entry, ENTRY_SIZE};
use crate::error::{NvsError, Result};
use crate::flash::ERASED_BYTE;
use crate::partition::Partition;

use super::{BITMAP_SIZE, PAGE_HEADER_SIZE, PAGE_OVERHEAD, PAGE_VERSION};

/// Lifecycle of a page: `Empty → Active → Full → Freeing → Empty`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageState {
    /// Erased, not yet holding entries
    Empty,
    /// Current write target
    Active,
    /// No longer written to
    Full,
    /// Being garbage collected: live entries are copied out, then erased
    Freeing,
    /// Header unreadable; the page is erased during recovery
    Corrupt,
}

impl PageState {
    const EMPTY: u32 = 0xFFFF_FFFF;
    const ACTIVE: u32 = 0xFFFF_FFFE;
    const FULL: u32 = 0xFFFF_FFFC;
    const FREEING: u32 = 0xFFFF_FFF8;
    const CORRUPT: u32 = 0xFFFF_FFF0;

    /// On-flash state word
    pub fn word(self) -> u32 {
        match self {
            PageState::Empty => Self::EMPTY,
            PageState::Active => Self::ACTIVE,
            PageState::Full => Self::FULL,
            PageState::Freeing => Self::FREEING,
            PageState::Corrupt => Self::CORRUPT,
        }
    }

    /// Parse an on-flash state word (unknown words are corrupt)
    pub fn from_word(word: u32) -> Self {
        match word {
            Self::EMPTY => PageState::Empty,
            Self::ACTIVE => PageState::Active,
            Self::FULL => PageState::Full,
            Self::FREEING => PageState::Freeing,
            _ => PageState::Corrupt,
        }
    }
}

/// State of one slot, two bits in the bitmap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Written,
    Erased,
}

impl SlotState {
    fn bits(self) -> u8 {
        match self {
            SlotState::Empty => 0b11,
            SlotState::Written => 0b10,
            SlotState::Erased => 0b00,
        }
    }

    fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b11 => SlotState::Empty,
            0b10 => SlotState::Written,
            _ => SlotState::Erased,
        }
    }
}

/// In-memory mirror of one page
#[derive(Debug, Clone)]
pub struct Page {
    index: usize,
    page_size: u32,
    state: PageState,
    seq: u32,
    slots: Vec<SlotState>,
    /// First slot never written since the last erase
    next_free: usize,
    /// Slots whose bitmap says empty although data reached them
    torn: Vec<usize>,
}

impl Page {
    /// Number of entry slots in a page of `page_size` bytes
    pub fn capacity_for(page_size: u32) -> usize {
        (page_size as usize - PAGE_OVERHEAD) / ENTRY_SIZE
    }

    /// A freshly erased page
    pub fn empty(index: usize, page_size: u32) -> Self {
        Self {
            index,
            page_size,
            state: PageState::Empty,
            seq: 0,
            slots: vec![SlotState::Empty; Self::capacity_for(page_size)],
            next_free: 0,
            torn: Vec::new(),
        }
    }

    /// Read page `index` from the partition
    ///
    /// Never writes. A page whose header fails validation comes back in
    /// the `Corrupt` state.
    pub fn load(partition: &Partition, index: usize) -> Result<Self> {
        let page_size = partition.page_size();
        let raw = partition.read(index as u32 * page_size, page_size as usize)?;
        let mut page = Self::empty(index, page_size);

        let mut header = &raw[..PAGE_HEADER_SIZE];
        let state = PageState::from_word(header.get_u32_le());
        let seq = header.get_u32_le();
        let version = header.get_u8();
        let stored_crc = u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]);

        match state {
            PageState::Empty => {
                if raw.iter().any(|&b| b != ERASED_BYTE) {
                    page.state = PageState::Corrupt;
                }
                return Ok(page);
            }
            PageState::Corrupt => {
                page.state = PageState::Corrupt;
                return Ok(page);
            }
            _ => {}
        }

        if stored_crc != header_crc(&raw[..PAGE_HEADER_SIZE]) || version != PAGE_VERSION {
            page.state = PageState::Corrupt;
            return Ok(page);
        }

        page.state = state;
        page.seq = seq;

        let bitmap = &raw[PAGE_HEADER_SIZE..PAGE_OVERHEAD];
        let mut last_used = None;
        for slot in 0..page.slots.len() {
            let bits = bitmap[slot / 4] >> ((slot % 4) * 2);
            let slot_state = SlotState::from_bits(bits);
            page.slots[slot] = slot_state;

            if slot_state == SlotState::Empty {
                let start = PAGE_OVERHEAD + slot * ENTRY_SIZE;
                if raw[start..start + ENTRY_SIZE].iter().any(|&b| b != ERASED_BYTE) {
                    page.torn.push(slot);
                    last_used = Some(slot);
                }
            } else {
                last_used = Some(slot);
            }
        }
        page.next_free = last_used.map(|s| s + 1).unwrap_or(0);

        Ok(page)
    }

    /// Mark slots that were written without their bitmap update as erased
    pub fn repair_torn(&mut self, partition: &Partition) -> Result<usize> {
        let torn = std::mem::take(&mut self.torn);
        for &slot in &torn {
            warn!(
                partition = partition.name(),
                page = self.index,
                slot,
                "discarding torn entry"
            );
            self.mark_erased(partition, slot, 1)?;
        }
        Ok(torn.len())
    }

    /// Turn an empty page into the active page with sequence number `seq`
    pub fn initialize(&mut self, partition: &Partition, seq: u32) -> Result<()> {
        if self.state != PageState::Empty {
            return Err(NvsError::Config(format!(
                "page {} initialized while {:?}",
                self.index, self.state
            )));
        }

        let mut header = [ERASED_BYTE; PAGE_HEADER_SIZE];
        {
            let mut buf = &mut header[..];
            buf.put_u32_le(PageState::Active.word());
            buf.put_u32_le(seq);
            buf.put_u8(PAGE_VERSION);
        }
        let crc = header_crc(&header);
        header[28..32].copy_from_slice(&crc.to_le_bytes());

        partition.write(self.base(), &header)?;
        self.state = PageState::Active;
        self.seq = seq;
        Ok(())
    }

    /// Program a new page state word
    pub fn set_state(&mut self, partition: &Partition, state: PageState) -> Result<()> {
        partition.write(self.base(), &state.word().to_le_bytes())?;
        self.state = state;
        Ok(())
    }

    /// Erase the page on flash and reset the mirror
    pub fn reset(&mut self, partition: &Partition) -> Result<()> {
        partition.erase_page(self.index)?;
        *self = Self::empty(self.index, self.page_size);
        Ok(())
    }

    /// Append an entry and its payload at the first free slot
    ///
    /// Data is programmed before the bitmap marks the slots written, so a
    /// power loss in between leaves a torn slot that recovery discards.
    pub fn write_item(&mut self, partition: &Partition, entry: &Entry, payload: &[u8]) -> Result<usize> {
        let span = entry.span as usize;
        let payload_cap = (span - 1) * ENTRY_SIZE;
        if payload.len() > payload_cap {
            return Err(NvsError::CorruptEntry(format!(
                "payload of {} bytes exceeds span {}",
                payload.len(),
                span
            )));
        }
        if self.free_slots() < span {
            return Err(NvsError::StorageFull);
        }

        let slot = self.next_free;
        let mut bytes = Vec::with_capacity(span * ENTRY_SIZE);
        bytes.extend_from_slice(&entry.encode());
        bytes.extend_from_slice(payload);
        bytes.resize(span * ENTRY_SIZE, ERASED_BYTE);

        self.next_free += span;
        if let Err(e) = partition.write(self.slot_offset(slot), &bytes) {
            // Slots may hold partial data; never hand them out again
            for s in slot..slot + span {
                self.slots[s] = SlotState::Erased;
            }
            return Err(e);
        }

        for s in slot..slot + span {
            self.slots[s] = SlotState::Written;
        }
        if let Err(e) = self.write_bitmap(partition, slot, span) {
            for s in slot..slot + span {
                self.slots[s] = SlotState::Erased;
            }
            return Err(e);
        }
        Ok(slot)
    }

    /// Flag `span` slots starting at `slot` as erased (stale)
    pub fn mark_erased(&mut self, partition: &Partition, slot: usize, span: usize) -> Result<()> {
        let end = (slot + span).min(self.slots.len());
        for s in slot..end {
            self.slots[s] = SlotState::Erased;
        }
        if end > self.next_free {
            self.next_free = end;
        }
        self.write_bitmap(partition, slot, end - slot)
    }

    /// Read and validate the entry header at `slot`
    pub fn read_entry(&self, partition: &Partition, slot: usize) -> Result<Entry> {
        let raw = partition.read(self.slot_offset(slot), ENTRY_SIZE)?;
        Entry::decode(&raw)
    }

    /// Read `len` payload bytes following the header at `slot`
    pub fn read_payload(&self, partition: &Partition, slot: usize, len: usize) -> Result<Vec<u8>> {
        partition.read(self.slot_offset(slot + 1), len)
    }

    /// Walk the written entries of the page
    ///
    /// Returns the valid entries (slot, entry) and the slots whose header
    /// failed validation or whose span runs past the written area.
    pub fn items(&self, partition: &Partition) -> Result<(Vec<(usize, Entry)>, Vec<usize>)> {
        let mut items = Vec::new();
        let mut bad = Vec::new();
        if self.next_free == 0 {
            return Ok((items, bad));
        }

        let raw = partition.read(self.slot_offset(0), self.next_free * ENTRY_SIZE)?;
        let mut slot = 0;
        while slot < self.next_free {
            if self.slots[slot] != SlotState::Written {
                slot += 1;
                continue;
            }

            let start = slot * ENTRY_SIZE;
            match Entry::decode(&raw[start..start + ENTRY_SIZE]) {
                Ok(entry) => {
                    let span = entry.span as usize;
                    let end = slot + span;
                    if end > self.next_free
                        || self.slots[slot..end].iter().any(|s| *s != SlotState::Written)
                    {
                        bad.push(slot);
                        slot += 1;
                        continue;
                    }
                    items.push((slot, entry));
                    slot = end;
                }
                Err(_) => {
                    bad.push(slot);
                    slot += 1;
                }
            }
        }
        Ok((items, bad))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn state(&self) -> PageState {
        self.state
    }

    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Total slots in the page
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Slots never written since the last erase
    pub fn free_slots(&self) -> usize {
        self.slots.len() - self.next_free
    }

    /// Slots holding live data
    pub fn used_slots(&self) -> usize {
        self.slots.iter().filter(|s| **s == SlotState::Written).count()
    }

    /// Stale slots, reclaimable by garbage collection
    pub fn erased_slots(&self) -> usize {
        self.slots[..self.next_free]
            .iter()
            .filter(|s| **s == SlotState::Erased)
            .count()
    }

    /// Slots a compaction of this page would free
    pub fn reclaimable_slots(&self) -> usize {
        self.capacity() - self.used_slots()
    }

    /// State of one slot
    pub fn slot_state(&self, slot: usize) -> SlotState {
        self.slots[slot]
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn base(&self) -> u32 {
        self.index as u32 * self.page_size
    }

    fn slot_offset(&self, slot: usize) -> u32 {
        self.base() + (PAGE_OVERHEAD + slot * ENTRY_SIZE) as u32
    }

    /// Program the bitmap bytes covering `span` slots from `slot`
    fn write_bitmap(&self, partition: &Partition, slot: usize, span: usize) -> Result<()> {
        if span == 0 {
            return Ok(());
        }
        let first = slot / 4;
        let last = (slot + span - 1) / 4;
        let bytes: Vec<u8> = (first..=last).map(|b| self.bitmap_byte(b)).collect();
        partition.write(self.base() + (PAGE_HEADER_SIZE + first) as u32, &bytes)
    }

    fn bitmap_byte(&self, byte: usize) -> u8 {
        let mut value = 0u8;
        for j in 0..4 {
            let slot = byte * 4 + j;
            let bits = self.slots.get(slot).map(|s| s.bits()).unwrap_or(0b11);
            value |= bits << (j * 2);
        }
        debug_assert!(byte < BITMAP_SIZE);
        value
    }
}

/// CRC32 over the sequence number, version and reserved bytes of a header
fn header_crc(header: &[u8]) -> u32 {
    crc32fast::hash(&header[4..28])
}
