//! Partition Module
//!
//! Resolves partition labels to regions of the flash medium.
//!
//! ## Responsibilities
//! - Look up a partition by name (`PartitionNotFound` otherwise)
//! - Validate the region geometry against the page layout
//! - Provide a bounds-checked, partition-relative view of the medium

mod registry;

pub use registry::{Partition, PartitionRegistry};

/// Partition used when the caller does not name one
pub const DEFAULT_PARTITION_NAME: &str = "nvs";
