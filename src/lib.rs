//! # nvstore
//!
//! Typed, namespaced key-value storage on raw flash partitions with:
//! - Fixed 32-byte, CRC-checked entry records
//! - Strings and blobs split into fragment chains that appear all or nothing
//! - Copy-then-erase garbage collection that survives power loss
//! - Scoped sessions: open, run, commit on success, always close
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Nvs::with_session / open                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                         Handle                              │
//! │        (typed get/set, staged writes, write lock)           │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 PartitionStore (per partition)              │
//! │      item index │ namespace index │ fragment chains         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │ PageManager │          │ Entry codec │
//!   │ (pages, GC) │          │ (32B, CRC)  │
//!   └──────┬──────┘          └─────────────┘
//!          ▼
//!   ┌─────────────┐
//!   │  Partition  │ ──► FlashMedium (MemFlash / FileFlash / ...)
//!   └─────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use nvstore::{MemFlash, Nvs, NvsError, OpenMode};
//!
//! let flash = Arc::new(MemFlash::builder().partition("nvs", 8).build()?);
//! let nvs = Nvs::with_medium(flash);
//!
//! nvs.with_session("cfg", OpenMode::ReadWrite, |h| {
//!     h.set_i32("retries", 3)?;
//!     h.set_str("mode", "fast")
//! })?;
//!
//! let retries = nvs.with_session("cfg", OpenMode::ReadOnly, |h| h.get_i32("retries"))?;
//! assert_eq!(retries, 3);
//! # Ok::<(), NvsError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod flash;
pub mod partition;
pub mod entry;
pub mod namespace;
pub mod storage;
pub mod handle;
pub mod nvs;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{NvsError, Result};
pub use config::{Config, SyncStrategy};
pub use entry::{ItemType, Value};
pub use flash::{FileFlash, FlashMedium, MemFlash};
pub use handle::{Handle, OpenMode, StoredType};
pub use nvs::Nvs;
pub use partition::DEFAULT_PARTITION_NAME;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of nvstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
