//! Nvs Module
//!
//! Top-level object that coordinates the medium, the partition registry
//! and one `PartitionStore` per initialized partition.
//!
//! ## Responsibilities
//! - Partition lifecycle: init (load + recovery), deinit, erase
//! - Open handles on (partition, namespace, mode)
//! - Scoped sessions: open, run the body, commit on success, always close

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{NvsError, Result};
use crate::flash::FlashMedium;
use crate::handle::{Handle, OpenMode};
use crate::partition::PartitionRegistry;
use crate::storage::{PartitionStore, StoreStats};

type Stores = HashMap<String, Arc<PartitionStore>>;

/// Non-volatile storage over one flash medium
///
/// ## Concurrency
/// - `stores`: guards the set of initialized partitions; held while a
///   partition is looked up, loaded or dropped and while a handle is
///   opened on it, never during a partition erase
/// - `erasing`: partitions whose pages are being erased; they cannot be
///   loaded until the erase finishes
/// - Each `PartitionStore` serializes its own reads and writes
/// - A partition with open handles can be neither deinitialized nor
///   erased, so at most one store per partition ever exists
pub struct Nvs {
    /// Instance configuration
    config: Config,

    /// Partition table of the medium
    registry: PartitionRegistry,

    /// Initialized partitions by name
    stores: Mutex<Stores>,

    /// Partitions currently being erased
    erasing: Mutex<HashSet<String>>,
}

impl Nvs {
    /// Create an instance over `medium`; no partition is loaded yet
    pub fn new(medium: Arc<dyn FlashMedium>, config: Config) -> Self {
        Self {
            config,
            registry: PartitionRegistry::new(medium),
            stores: Mutex::new(HashMap::new()),
            erasing: Mutex::new(HashSet::new()),
        }
    }

    /// Create an instance with the default configuration
    pub fn with_medium(medium: Arc<dyn FlashMedium>) -> Self {
        Self::new(medium, Config::default())
    }

    // =========================================================================
    // Partition Lifecycle
    // =========================================================================

    /// Initialize the default partition
    pub fn init(&self) -> Result<()> {
        self.init_partition(&self.config.default_partition)
    }

    /// Load a partition and run recovery; no-op if already initialized
    pub fn init_partition(&self, name: &str) -> Result<()> {
        let mut stores = self.stores.lock();
        self.load(&mut stores, name).map(|_| ())
    }

    /// Drop the default partition's in-memory state
    pub fn deinit(&self) -> Result<()> {
        self.deinit_partition(&self.config.default_partition)
    }

    /// Drop a partition's in-memory state
    ///
    /// Fails with `AccessDenied` while handles on the partition are open.
    /// The next open reloads the partition from the medium.
    pub fn deinit_partition(&self, name: &str) -> Result<()> {
        self.registry.resolve(name)?;

        let mut stores = self.stores.lock();
        match stores.get(name) {
            Some(store) => {
                Self::ensure_no_handles(name, store)?;
                stores.remove(name);
                info!(partition = name, "partition deinitialized");
            }
            None => debug!(partition = name, "partition was not initialized"),
        }
        Ok(())
    }

    /// Erase the default partition
    pub fn erase(&self) -> Result<()> {
        self.erase_partition(&self.config.default_partition)
    }

    /// Erase every page of a partition, deinitializing it first
    ///
    /// Fails with `AccessDenied` while handles on the partition are open.
    /// Other partitions stay usable during the erase; this one cannot be
    /// opened until it finishes.
    pub fn erase_partition(&self, name: &str) -> Result<()> {
        let partition = self.registry.open(name)?;

        {
            let mut stores = self.stores.lock();
            if let Some(store) = stores.get(name) {
                Self::ensure_no_handles(name, store)?;
            }
            if !self.erasing.lock().insert(name.to_string()) {
                return Err(NvsError::AccessDenied(format!(
                    "partition {:?} is already being erased",
                    name
                )));
            }
            stores.remove(name);
        }

        let erased = partition.erase_all().and_then(|_| partition.sync());
        self.erasing.lock().remove(name);
        erased?;

        info!(partition = name, pages = partition.page_count(), "partition erased");
        Ok(())
    }

    /// Whether a partition is currently loaded
    pub fn is_initialized(&self, name: &str) -> bool {
        self.stores.lock().contains_key(name)
    }

    // =========================================================================
    // Handles
    // =========================================================================

    /// Open `namespace` in the default partition
    pub fn open(&self, namespace: &str, mode: OpenMode) -> Result<Handle> {
        self.open_from_partition(&self.config.default_partition, namespace, mode)
    }

    /// Open `namespace` in the named partition
    ///
    /// With `auto_init`, the partition is initialized on first use;
    /// otherwise it must have been initialized with `init_partition`.
    pub fn open_from_partition(&self, partition: &str, namespace: &str, mode: OpenMode) -> Result<Handle> {
        // Held until the handle is registered so a concurrent deinit or
        // erase sees it
        let mut stores = self.stores.lock();
        let store = self.store(&mut stores, partition)?;
        Handle::open(store, namespace, mode)
    }

    /// Run `body` against a handle on `namespace` of the default partition
    ///
    /// See [`Nvs::with_partition_session`].
    pub fn with_session<T, E, F>(&self, namespace: &str, mode: OpenMode, body: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Handle) -> std::result::Result<T, E>,
        E: From<NvsError>,
    {
        let partition = self.config.default_partition.clone();
        self.with_partition_session(&partition, namespace, mode, body)
    }

    /// Run `body` against a handle on (`partition`, `namespace`)
    ///
    /// If `body` succeeds its writes are committed, then the handle is
    /// closed. If `body` fails nothing is committed, the handle is still
    /// closed, and the body's error is returned.
    pub fn with_partition_session<T, E, F>(
        &self,
        partition: &str,
        namespace: &str,
        mode: OpenMode,
        body: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Handle) -> std::result::Result<T, E>,
        E: From<NvsError>,
    {
        let mut handle = self.open_from_partition(partition, namespace, mode)?;

        match body(&mut handle) {
            Ok(value) => {
                let committed = handle.commit();
                let closed = handle.close();
                committed?;
                closed?;
                Ok(value)
            }
            Err(e) => {
                debug!(partition, namespace, "session body failed, skipping commit");
                if let Err(close_err) = handle.close() {
                    warn!(partition, namespace, error = %close_err, "close after failed session");
                }
                Err(e)
            }
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Usage counters of the default partition
    pub fn stats(&self) -> Result<StoreStats> {
        self.partition_stats(&self.config.default_partition)
    }

    /// Usage counters of a partition (initializing it if allowed)
    pub fn partition_stats(&self, name: &str) -> Result<StoreStats> {
        let store = {
            let mut stores = self.stores.lock();
            self.store(&mut stores, name)?
        };
        store.stats()
    }

    /// Names of every partition on the medium
    pub fn partitions(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn store(&self, stores: &mut Stores, name: &str) -> Result<Arc<PartitionStore>> {
        if let Some(store) = stores.get(name) {
            return Ok(Arc::clone(store));
        }
        if !self.config.auto_init {
            self.registry.resolve(name)?;
            return Err(NvsError::NotInitialized(name.to_string()));
        }
        self.load(stores, name)
    }

    fn load(&self, stores: &mut Stores, name: &str) -> Result<Arc<PartitionStore>> {
        if let Some(store) = stores.get(name) {
            return Ok(Arc::clone(store));
        }
        if self.erasing.lock().contains(name) {
            return Err(NvsError::AccessDenied(format!("partition {:?} is being erased", name)));
        }

        let partition = self.registry.open(name)?;
        let store = Arc::new(PartitionStore::open(partition, self.config.clone())?);
        stores.insert(name.to_string(), Arc::clone(&store));
        info!(partition = name, "partition initialized");
        Ok(store)
    }

    fn ensure_no_handles(name: &str, store: &PartitionStore) -> Result<()> {
        let open = store.open_handles();
        if open > 0 {
            return Err(NvsError::AccessDenied(format!(
                "partition {:?} has {} open handle(s)",
                name, open
            )));
        }
        Ok(())
    }
}
