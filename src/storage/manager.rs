//! Page Manager
//!
//! Owns every page of one partition and decides where entries go.
//!
//! ## Responsibilities
//! - Discover page states and sequence numbers on load
//! - Keep pages ordered oldest → newest by sequence number
//! - Append entries to the active page, rotating to an empty page
//! - Garbage collection when only the reserved empty pages remain
//! - Finish a garbage collection interrupted by power loss

use std::cmp::Reverse;
use std::collections::VecDeque;

use tracing::{debug, warn};

use crate::entry::{Entry, ENTRY_SIZE};
use crate::error::{NvsError, Result};
use crate::partition::Partition;

use super::page::{Page, PageState};

/// Where an entry lives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    /// Physical page index in the partition
    pub page: usize,
    /// First slot of the entry
    pub slot: usize,
    /// Slots occupied
    pub span: u8,
}

/// An entry moved by garbage collection
#[derive(Debug, Clone)]
pub struct Relocation {
    pub from: Location,
    pub to: Location,
    pub entry: Entry,
}

/// Slot and page counters of a partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageStats {
    pub page_count: usize,
    pub empty_pages: usize,
    pub total_entries: usize,
    pub used_entries: usize,
    pub erased_entries: usize,
    pub free_entries: usize,
}

/// Page allocation and garbage collection for one partition
///
/// ## Invariants
/// - `order` holds every non-empty page, oldest sequence number first
/// - at most one page is `Active`, and it is the last in `order`
/// - a page is only erased after its live entries were copied and synced
pub struct PageManager {
    partition: Partition,
    pages: Vec<Page>,
    order: Vec<usize>,
    free: VecDeque<usize>,
    active: Option<usize>,
    next_seq: u32,
    reserve: usize,
}

impl PageManager {
    /// Load all pages of a partition
    ///
    /// On startup:
    /// 1. Read every page header and bitmap
    /// 2. Erase pages with corrupt headers
    /// 3. Discard torn slots and undecodable entries
    /// 4. Order pages by sequence number, demote stale active pages
    ///
    /// Returns the manager and every valid entry, oldest first.
    pub fn load(partition: Partition, reserve: usize) -> Result<(Self, Vec<(Location, Entry)>)> {
        let page_count = partition.page_count();
        if page_count <= reserve {
            return Err(NvsError::Config(format!(
                "partition {} has {} pages, {} reserved for garbage collection",
                partition.name(),
                page_count,
                reserve
            )));
        }

        let mut pages = Vec::with_capacity(page_count);
        for index in 0..page_count {
            let mut page = Page::load(&partition, index)?;
            if page.state() == PageState::Corrupt {
                warn!(partition = partition.name(), page = index, "erasing corrupt page");
                page.reset(&partition)?;
            }
            page.repair_torn(&partition)?;
            pages.push(page);
        }

        let mut order: Vec<usize> = pages
            .iter()
            .filter(|p| p.state() != PageState::Empty)
            .map(|p| p.index())
            .collect();
        order.sort_by_key(|&i| pages[i].seq());

        let free: VecDeque<usize> = pages
            .iter()
            .filter(|p| p.state() == PageState::Empty)
            .map(|p| p.index())
            .collect();

        let next_seq = order
            .last()
            .map(|&i| pages[i].seq().wrapping_add(1))
            .unwrap_or(0);

        let mut manager = Self {
            partition,
            pages,
            order,
            free,
            active: None,
            next_seq,
            reserve,
        };

        // Only the newest page may stay active
        let last = manager.order.last().copied();
        for i in manager.order.clone() {
            if manager.pages[i].state() != PageState::Active {
                continue;
            }
            if Some(i) == last {
                manager.active = Some(i);
            } else {
                warn!(partition = manager.partition.name(), page = i, "demoting stale active page");
                manager.pages[i].set_state(&manager.partition, PageState::Full)?;
            }
        }

        let mut entries = Vec::new();
        for i in manager.order.clone() {
            let (items, bad) = manager.pages[i].items(&manager.partition)?;
            for slot in bad {
                warn!(
                    partition = manager.partition.name(),
                    page = i,
                    slot,
                    "discarding entry with bad header"
                );
                manager.pages[i].mark_erased(&manager.partition, slot, 1)?;
            }
            for (slot, entry) in items {
                let location = Location {
                    page: i,
                    slot,
                    span: entry.span,
                };
                entries.push((location, entry));
            }
        }

        Ok((manager, entries))
    }

    /// Append an entry (and its payload slots) to the active page
    ///
    /// May rotate pages or garbage collect first; entries moved by
    /// garbage collection are reported so the caller can re-index them.
    pub fn append(&mut self, entry: &Entry, payload: &[u8]) -> Result<(Location, Vec<Relocation>)> {
        let span = entry.span as usize;
        let (_, relocations) = self.ensure_space(span, span)?;
        let active = self.active.ok_or(NvsError::StorageFull)?;
        let slot = self.pages[active].write_item(&self.partition, entry, payload)?;
        Ok((
            Location {
                page: active,
                slot,
                span: entry.span,
            },
            relocations,
        ))
    }

    /// Make room for at least `min_span` slots on the active page
    ///
    /// Returns how many slots (up to `want_span`) are available without
    /// further rotation.
    pub fn ensure_space(&mut self, min_span: usize, want_span: usize) -> Result<(usize, Vec<Relocation>)> {
        if min_span > self.page_capacity() {
            return Err(NvsError::StorageFull);
        }

        let mut relocations = Vec::new();
        loop {
            if let Some(active) = self.active {
                let free = self.pages[active].free_slots();
                if free >= want_span {
                    return Ok((want_span, relocations));
                }
                if free >= min_span {
                    return Ok((free, relocations));
                }
                debug!(partition = self.partition.name(), page = active, "page full, rotating");
                self.pages[active].set_state(&self.partition, PageState::Full)?;
                self.active = None;
            }

            if self.free.len() > self.reserve {
                self.activate_free_page()?;
                continue;
            }

            relocations.extend(self.collect_garbage(min_span)?);
        }
    }

    /// Slots per page
    pub fn page_capacity(&self) -> usize {
        Page::capacity_for(self.partition.page_size())
    }

    /// Compact the full page with the most reclaimable slots
    ///
    /// Copy-then-erase: the victim is marked `Freeing`, its live entries
    /// are copied to a reserved empty page, the medium is synced, and only
    /// then is the victim erased.
    pub fn collect_garbage(&mut self, min_span: usize) -> Result<Vec<Relocation>> {
        let victim = self
            .order
            .iter()
            .rev()
            .copied()
            .filter(|&i| self.pages[i].state() == PageState::Full)
            .max_by_key(|&i| (self.pages[i].reclaimable_slots(), Reverse(self.pages[i].seq())));

        let victim = match victim {
            Some(v) if self.pages[v].reclaimable_slots() >= min_span => v,
            _ => return Err(NvsError::StorageFull),
        };
        if self.free.is_empty() {
            return Err(NvsError::StorageFull);
        }

        debug!(
            partition = self.partition.name(),
            page = victim,
            reclaimable = self.pages[victim].reclaimable_slots(),
            "garbage collecting page"
        );

        self.pages[victim].set_state(&self.partition, PageState::Freeing)?;
        let dest = self.activate_free_page()?;
        self.move_live_entries(victim, dest)
    }

    /// Finish garbage collection of a page left `Freeing` by power loss
    ///
    /// Must run after duplicates were resolved: every entry still written
    /// in the freeing page has no copy elsewhere.
    pub fn complete_interrupted_collection(&mut self) -> Result<Vec<Relocation>> {
        let mut relocations = Vec::new();
        let freeing: Vec<usize> = self
            .order
            .iter()
            .copied()
            .filter(|&i| self.pages[i].state() == PageState::Freeing)
            .collect();

        for victim in freeing {
            warn!(partition = self.partition.name(), page = victim, "resuming interrupted garbage collection");

            let dest = match self.active {
                Some(a)
                    if self.pages[a].seq() > self.pages[victim].seq()
                        && self.pages[a].free_slots() >= self.pages[victim].used_slots() =>
                {
                    a
                }
                Some(a) => {
                    self.pages[a].set_state(&self.partition, PageState::Full)?;
                    self.active = None;
                    self.activate_free_page()?
                }
                None => self.activate_free_page()?,
            };
            relocations.extend(self.move_live_entries(victim, dest)?);
        }
        Ok(relocations)
    }

    /// Flag an entry stale
    pub fn erase(&mut self, location: Location) -> Result<()> {
        self.pages[location.page].mark_erased(&self.partition, location.slot, location.span as usize)
    }

    /// Read and validate the entry header at a location
    pub fn read_entry(&self, location: Location) -> Result<Entry> {
        self.pages[location.page].read_entry(&self.partition, location.slot)
    }

    /// Read `len` payload bytes of the entry at a location
    pub fn read_payload(&self, location: Location, len: usize) -> Result<Vec<u8>> {
        self.pages[location.page].read_payload(&self.partition, location.slot, len)
    }

    /// Durability barrier
    pub fn sync(&self) -> Result<()> {
        self.partition.sync()
    }

    /// Slot and page counters
    pub fn stats(&self) -> PageStats {
        let mut stats = PageStats {
            page_count: self.pages.len(),
            ..PageStats::default()
        };
        for page in &self.pages {
            let capacity = page.capacity();
            stats.total_entries += capacity;
            if page.state() == PageState::Empty {
                stats.empty_pages += 1;
                stats.free_entries += capacity;
                continue;
            }
            let used = page.used_slots();
            let erased = page.erased_slots();
            stats.used_entries += used;
            stats.erased_entries += erased;
            stats.free_entries += capacity - used - erased;
        }
        stats
    }

    /// The partition this manager writes to
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn activate_free_page(&mut self) -> Result<usize> {
        let index = self.free.pop_front().ok_or(NvsError::StorageFull)?;
        let seq = self.next_seq;
        if let Err(e) = self.pages[index].initialize(&self.partition, seq) {
            self.free.push_front(index);
            return Err(e);
        }
        self.next_seq = self.next_seq.wrapping_add(1);
        self.order.push(index);
        self.active = Some(index);
        debug!(partition = self.partition.name(), page = index, seq, "activated page");
        Ok(index)
    }

    /// Copy every written entry of `victim` into `dest`, sync, erase `victim`
    fn move_live_entries(&mut self, victim: usize, dest: usize) -> Result<Vec<Relocation>> {
        let (items, _) = self.pages[victim].items(&self.partition)?;
        let mut relocations = Vec::with_capacity(items.len());

        for (slot, entry) in items {
            let span = entry.span as usize;
            let payload = self.pages[victim].read_payload(&self.partition, slot, (span - 1) * ENTRY_SIZE)?;
            let to_slot = self.pages[dest].write_item(&self.partition, &entry, &payload)?;
            relocations.push(Relocation {
                from: Location {
                    page: victim,
                    slot,
                    span: entry.span,
                },
                to: Location {
                    page: dest,
                    slot: to_slot,
                    span: entry.span,
                },
                entry,
            });
        }

        // Copies must be durable before the source disappears
        self.partition.sync()?;
        self.pages[victim].reset(&self.partition)?;

        self.order.retain(|&i| i != victim);
        self.free.push_back(victim);
        Ok(relocations)
    }
}
