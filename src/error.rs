//! Error types for nvstore
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

use crate::entry::ItemType;

/// Result type alias using NvsError
pub type Result<T> = std::result::Result<T, NvsError>;

/// Unified error type for nvstore operations
#[derive(Debug, Error)]
pub enum NvsError {
    // -------------------------------------------------------------------------
    // Medium Errors
    // -------------------------------------------------------------------------
    #[error("Medium I/O error: {0}")]
    MediumIo(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Partition / Namespace Errors
    // -------------------------------------------------------------------------
    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    #[error("Partition not initialized: {0}")]
    NotInitialized(String),

    #[error("Namespace not found: {0}")]
    NamespaceNotFound(String),

    #[error("No namespace id left in partition")]
    NamespaceFull,

    // -------------------------------------------------------------------------
    // Entry Errors
    // -------------------------------------------------------------------------
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    #[error("Type mismatch for key {key:?}: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: ItemType,
        found: ItemType,
    },

    #[error("Corrupt entry: {0}")]
    CorruptEntry(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Value too large: {len} bytes (max {max})")]
    ValueTooLarge { len: usize, max: usize },

    #[error("Not enough space in partition")]
    StorageFull,

    // -------------------------------------------------------------------------
    // Handle Errors
    // -------------------------------------------------------------------------
    #[error("Write attempted through a read-only handle")]
    ReadOnlyViolation,

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Handle is closed")]
    HandleClosed,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl NvsError {
    /// Build a `MediumIo` error from a message (used by media that are not
    /// backed by `std::io`)
    pub fn medium(msg: impl Into<String>) -> Self {
        NvsError::MediumIo(std::io::Error::new(std::io::ErrorKind::Other, msg.into()))
    }

    /// Whether the error came from the flash medium
    pub fn is_medium(&self) -> bool {
        matches!(self, NvsError::MediumIo(_))
    }
}
