//! Configuration for nvstore
//!
//! Centralized configuration with sensible defaults.

use crate::partition::DEFAULT_PARTITION_NAME;

/// Main configuration for an `Nvs` instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Partition Configuration
    // -------------------------------------------------------------------------
    /// Partition used when a caller does not name one
    pub default_partition: String,

    /// Initialize a partition on its first open instead of requiring
    /// an explicit `init_partition`
    pub auto_init: bool,

    // -------------------------------------------------------------------------
    // Namespace Configuration
    // -------------------------------------------------------------------------
    /// Highest namespace id handed out (id 0 is the namespace index itself)
    pub max_namespaces: u8,

    // -------------------------------------------------------------------------
    // Page Store Configuration
    // -------------------------------------------------------------------------
    /// Empty pages held back so garbage collection always has a destination
    pub gc_reserve_pages: usize,

    /// Largest string or blob accepted (in bytes)
    pub max_value_size: usize,

    /// When the medium is synced
    pub sync_strategy: SyncStrategy,
}

/// Medium sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// Sync once per commit (after every staged write was applied)
    OnCommit,

    /// Sync after every applied write (safest, slowest)
    EveryWrite,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_partition: DEFAULT_PARTITION_NAME.to_string(),
            auto_init: true,
            max_namespaces: 254,
            gc_reserve_pages: 1,
            max_value_size: 508_000,
            sync_strategy: SyncStrategy::OnCommit,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the partition used when none is named
    pub fn default_partition(mut self, name: impl Into<String>) -> Self {
        self.config.default_partition = name.into();
        self
    }

    /// Enable or disable lazy partition initialization
    pub fn auto_init(mut self, enabled: bool) -> Self {
        self.config.auto_init = enabled;
        self
    }

    /// Set the maximum number of namespaces per partition
    pub fn max_namespaces(mut self, count: u8) -> Self {
        self.config.max_namespaces = count;
        self
    }

    /// Set the number of pages reserved for garbage collection
    pub fn gc_reserve_pages(mut self, pages: usize) -> Self {
        self.config.gc_reserve_pages = pages;
        self
    }

    /// Set the largest accepted string/blob size (in bytes)
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.config.max_value_size = size;
        self
    }

    /// Set the medium sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
