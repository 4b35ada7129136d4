//! Storage Module
//!
//! Append-and-compact page store on top of one partition.
//!
//! ## Responsibilities
//! - Page lifecycle: empty → active → full → freeing → empty
//! - Append entries to the active page, rotate when it fills
//! - Garbage collection: copy live entries to a fresh page, then erase
//! - Recovery after power loss (torn slots, duplicates, interrupted GC)
//! - Item index, typed reads/writes, fragment chains, namespace persistence
//!
//! ## Page Format
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │ Header (32 bytes)                                          │
//! │   State u32 | Seq u32 | Version u8 | Reserved (19) | CRC32 │
//! ├────────────────────────────────────────────────────────────┤
//! │ Entry-state bitmap (32 bytes, 2 bits per slot)             │
//! │   11 = empty, 10 = written, 00 = erased                    │
//! ├────────────────────────────────────────────────────────────┤
//! │ Slots ((page_size - 64) / 32 entries of 32 bytes)          │
//! └────────────────────────────────────────────────────────────┘
//! ```

mod manager;
mod page;
mod store;

pub use manager::{Location, PageManager, PageStats, Relocation};
pub use page::{Page, PageState, SlotState};
pub use store::{EntryInfo, PartitionStore, StoreStats, WriteLock};

/// Page header size in bytes
pub const PAGE_HEADER_SIZE: usize = 32;

/// Entry-state bitmap size in bytes (room for 128 slots)
pub const BITMAP_SIZE: usize = 32;

/// Bytes per page not available for slots
pub const PAGE_OVERHEAD: usize = PAGE_HEADER_SIZE + BITMAP_SIZE;

/// Smallest supported page size
pub const MIN_PAGE_SIZE: u32 = 256;

/// Largest supported page size (126 slots fit the bitmap)
pub const MAX_PAGE_SIZE: u32 = 4096;

/// Page format version written into every header
pub const PAGE_VERSION: u8 = 0xFE;
