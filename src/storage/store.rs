//! Partition Store
//!
//! Per-partition storage engine: item index, typed reads and writes,
//! fragment chains for strings/blobs, and namespace persistence.
//!
//! ## Responsibilities
//! - Rebuild the item and namespace indexes on load
//! - Resolve duplicates and orphaned fragments left by power loss
//! - Supersede-then-erase writes (new entry first, old one flagged stale)
//! - Head-last fragment chains so a string/blob is visible all or nothing
//! - Per-namespace write locks

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::{Config, SyncStrategy};
use crate::entry::{
    validate_key, ChainHead, Entry, FragmentHeader, ItemType, Value, CHAIN_END, CHUNK_HEAD,
    ENTRY_SIZE, MAX_FRAGMENTS,
};
use crate::error::{NvsError, Result};
use crate::namespace::{NamespaceIndex, Resolved, INDEX_NAMESPACE_ID};
use crate::partition::Partition;

use super::manager::{Location, PageManager, PageStats, Relocation};

/// Identity of one entry in the index
///
/// Scalars and chain heads use `chunk = CHUNK_HEAD, generation = 0`;
/// fragments carry their chunk index and chain generation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ItemId {
    ns: u8,
    chunk: u8,
    generation: u8,
    key: String,
}

impl ItemId {
    fn head(ns: u8, key: &str) -> Self {
        Self {
            ns,
            chunk: CHUNK_HEAD,
            generation: 0,
            key: key.to_string(),
        }
    }

    fn fragment(ns: u8, key: &str, chunk: u8, generation: u8) -> Self {
        Self {
            ns,
            chunk,
            generation,
            key: key.to_string(),
        }
    }

    fn of(entry: &Entry) -> Self {
        match entry.fragment_header() {
            Some(header) => Self::fragment(entry.ns, &entry.key, entry.chunk, header.generation),
            None => Self::head(entry.ns, &entry.key),
        }
    }
}

/// Index value: where the entry lives plus what is needed without a read
#[derive(Debug, Clone, Copy)]
struct Slot {
    location: Location,
    item_type: ItemType,
    chain: Option<ChainHead>,
}

impl Slot {
    fn new(location: Location, entry: &Entry) -> Self {
        Self {
            location,
            item_type: entry.item_type,
            chain: entry.chain_head(),
        }
    }
}

/// A live key and its type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub key: String,
    pub item_type: ItemType,
}

/// Usage counters of a partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub used_entries: usize,
    pub free_entries: usize,
    pub erased_entries: usize,
    pub total_entries: usize,
    pub page_count: usize,
    pub empty_pages: usize,
    pub namespace_count: usize,
}

impl From<(PageStats, usize)> for StoreStats {
    fn from((pages, namespace_count): (PageStats, usize)) -> Self {
        Self {
            used_entries: pages.used_entries,
            free_entries: pages.free_entries,
            erased_entries: pages.erased_entries,
            total_entries: pages.total_entries,
            page_count: pages.page_count,
            empty_pages: pages.empty_pages,
            namespace_count,
        }
    }
}

/// Mutable state of a partition, guarded by `PartitionStore::inner`
struct StoreInner {
    pages: PageManager,
    index: HashMap<ItemId, Slot>,
    namespaces: NamespaceIndex,
    /// A medium failure left the mirror unreliable; reload before use
    needs_reload: bool,
}

impl StoreInner {
    /// Load the page store and rebuild both indexes
    ///
    /// Recovery steps, in order:
    /// 1. Later copy of a duplicated entry wins, the earlier is erased
    /// 2. An interrupted garbage collection is completed
    /// 3. Fragments without a matching chain head are erased
    /// 4. Namespace mappings are read back from namespace 0
    fn load(partition: Partition, config: &Config) -> Result<Self> {
        let (pages, entries) = PageManager::load(partition, config.gc_reserve_pages)?;
        let mut inner = Self {
            pages,
            index: HashMap::new(),
            namespaces: NamespaceIndex::new(config.max_namespaces),
            needs_reload: false,
        };

        for (location, entry) in entries {
            let id = ItemId::of(&entry);
            if let Some(previous) = inner.index.insert(id, Slot::new(location, &entry)) {
                warn!(
                    partition = inner.pages.partition().name(),
                    key = %entry.key,
                    ns = entry.ns,
                    "resolving duplicate entry"
                );
                inner.pages.erase(previous.location)?;
            }
        }

        let relocations = inner.pages.complete_interrupted_collection()?;
        inner.apply_relocations(&relocations);
        if !relocations.is_empty() {
            inner.pages.sync()?;
        }

        inner.drop_orphan_fragments()?;
        inner.restore_namespaces()?;
        Ok(inner)
    }

    fn drop_orphan_fragments(&mut self) -> Result<()> {
        let orphans: Vec<ItemId> = self
            .index
            .iter()
            .filter(|(id, slot)| id.chunk != CHUNK_HEAD && !self.fragment_is_owned(id, slot))
            .map(|(id, _)| id.clone())
            .collect();

        for id in orphans {
            warn!(
                partition = self.pages.partition().name(),
                key = %id.key,
                ns = id.ns,
                chunk = id.chunk,
                "dropping orphaned fragment"
            );
            if let Some(slot) = self.index.remove(&id) {
                self.pages.erase(slot.location)?;
            }
        }
        Ok(())
    }

    fn fragment_is_owned(&self, id: &ItemId, fragment: &Slot) -> bool {
        let Some(head) = self.index.get(&ItemId::head(id.ns, &id.key)) else {
            return false;
        };
        match head.chain {
            Some(chain) => {
                head.item_type == fragment.item_type
                    && chain.generation == id.generation
                    && id.chunk < chain.fragments
            }
            None => false,
        }
    }

    fn restore_namespaces(&mut self) -> Result<()> {
        let mappings: Vec<(String, Location)> = self
            .index
            .iter()
            .filter(|(id, slot)| {
                id.ns == INDEX_NAMESPACE_ID && id.chunk == CHUNK_HEAD && slot.item_type == ItemType::U8
            })
            .map(|(id, slot)| (id.key.clone(), slot.location))
            .collect();

        for (name, location) in mappings {
            let restored = match self.pages.read_entry(location) {
                Ok(entry) => match entry.scalar_value() {
                    Some(Value::U8(id)) => self.namespaces.restore(&name, id),
                    _ => false,
                },
                Err(NvsError::CorruptEntry(_)) => false,
                Err(e) => return Err(e),
            };
            if !restored {
                warn!(
                    partition = self.pages.partition().name(),
                    namespace = %name,
                    "ignoring unusable namespace mapping"
                );
            }
        }
        Ok(())
    }

    fn apply_relocations(&mut self, relocations: &[Relocation]) {
        for relocation in relocations {
            let id = ItemId::of(&relocation.entry);
            if let Some(slot) = self.index.get_mut(&id) {
                if slot.location == relocation.from {
                    slot.location = relocation.to;
                }
            }
        }
    }

    /// Append an entry, keeping the index in step with garbage collection
    fn append(&mut self, entry: &Entry, payload: &[u8]) -> Result<Location> {
        let (location, relocations) = self.pages.append(entry, payload)?;
        self.apply_relocations(&relocations);
        Ok(location)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    fn read(&self, ns: u8, key: &str, expected: ItemType) -> Result<Value> {
        let slot = self
            .index
            .get(&ItemId::head(ns, key))
            .ok_or_else(|| NvsError::KeyNotFound(key.to_string()))?;

        if slot.item_type != expected {
            return Err(NvsError::TypeMismatch {
                key: key.to_string(),
                expected,
                found: slot.item_type,
            });
        }

        let entry = self.pages.read_entry(slot.location)?;
        if entry.ns != ns || entry.key != key || entry.item_type != expected || !entry.is_head() {
            return Err(NvsError::CorruptEntry(format!(
                "{:?}: entry on flash does not match the index",
                key
            )));
        }

        if !expected.is_variable() {
            return entry
                .scalar_value()
                .ok_or_else(|| NvsError::CorruptEntry(format!("{:?}: bad scalar", key)));
        }

        let chain = entry
            .chain_head()
            .ok_or_else(|| NvsError::CorruptEntry(format!("{:?}: bad chain head", key)))?;
        let payload = self.read_chain(ns, key, expected, chain)?;
        Value::from_payload(expected, key, payload)
    }

    /// Reassemble a fragment chain, validating every link and checksum
    fn read_chain(&self, ns: u8, key: &str, item_type: ItemType, chain: ChainHead) -> Result<Vec<u8>> {
        let corrupt = |what: String| NvsError::CorruptEntry(format!("{:?}: {}", key, what));
        let mut payload = Vec::with_capacity(chain.total_len as usize);

        for chunk in 0..chain.fragments {
            let slot = self
                .index
                .get(&ItemId::fragment(ns, key, chunk, chain.generation))
                .ok_or_else(|| corrupt(format!("fragment {} missing", chunk)))?;

            let entry = self.pages.read_entry(slot.location)?;
            let header = entry
                .fragment_header()
                .ok_or_else(|| corrupt(format!("fragment {} has no header", chunk)))?;
            if entry.item_type != item_type || header.generation != chain.generation {
                return Err(corrupt(format!("fragment {} belongs to another chain", chunk)));
            }

            let expected_next = if chunk + 1 == chain.fragments {
                CHAIN_END
            } else {
                chunk + 1
            };
            if header.next != expected_next {
                return Err(corrupt(format!(
                    "fragment {} links to {}, expected {}",
                    chunk, header.next, expected_next
                )));
            }

            let data = self.pages.read_payload(slot.location, header.len as usize)?;
            if crc32fast::hash(&data) != header.data_crc {
                return Err(corrupt(format!("fragment {} checksum mismatch", chunk)));
            }
            payload.extend_from_slice(&data);
        }

        if payload.len() != chain.total_len as usize {
            return Err(corrupt(format!(
                "chain holds {} bytes, head says {}",
                payload.len(),
                chain.total_len
            )));
        }
        Ok(payload)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    fn write(&mut self, ns: u8, key: &str, value: &Value, max_value_size: usize) -> Result<()> {
        validate_key(key)?;
        let head_id = ItemId::head(ns, key);

        let Some(payload) = value.payload() else {
            if let Some(current) = self.index.get(&head_id) {
                if current.item_type == value.item_type() {
                    if let Ok(entry) = self.pages.read_entry(current.location) {
                        if entry.scalar_value().as_ref() == Some(value) {
                            return Ok(());
                        }
                    }
                }
            }

            let entry = Entry::scalar(ns, key, value)?;
            let location = self.append(&entry, &[])?;
            return self.supersede(head_id, Slot::new(location, &entry));
        };

        if payload.len() > max_value_size {
            return Err(NvsError::ValueTooLarge {
                len: payload.len(),
                max: max_value_size,
            });
        }

        let item_type = value.item_type();
        let generation = self
            .index
            .get(&head_id)
            .and_then(|slot| slot.chain)
            .map(|chain| chain.generation.wrapping_add(1))
            .unwrap_or(0);

        // Leftovers of an earlier failed write would collide in the index
        self.erase_generation(ns, key, generation)?;

        let fragments = match self.write_fragments(ns, key, item_type, generation, payload) {
            Ok(count) => count,
            Err(e) => {
                self.abandon_generation(ns, key, generation);
                return Err(e);
            }
        };

        let chain = ChainHead {
            total_len: payload.len() as u32,
            fragments,
            generation,
        };
        let head = Entry::head(ns, key, item_type, chain);
        let location = match self.append(&head, &[]) {
            Ok(location) => location,
            Err(e) => {
                self.abandon_generation(ns, key, generation);
                return Err(e);
            }
        };
        self.supersede(head_id, Slot::new(location, &head))
    }

    /// Write the fragments of a chain, each within one page
    fn write_fragments(
        &mut self,
        ns: u8,
        key: &str,
        item_type: ItemType,
        generation: u8,
        payload: &[u8],
    ) -> Result<u8> {
        let capacity = self.pages.page_capacity();
        let mut offset = 0usize;
        let mut chunk = 0usize;

        while offset < payload.len() {
            let remaining = payload.len() - offset;
            let want = (1 + remaining.div_ceil(ENTRY_SIZE)).min(capacity);
            let (granted, relocations) = self.pages.ensure_space(want.min(2), want)?;
            self.apply_relocations(&relocations);

            let len = ((granted - 1) * ENTRY_SIZE).min(remaining);
            let last = offset + len == payload.len();
            if chunk + 1 > MAX_FRAGMENTS || (!last && chunk + 2 > MAX_FRAGMENTS) {
                return Err(NvsError::ValueTooLarge {
                    len: payload.len(),
                    max: MAX_FRAGMENTS * (capacity - 1) * ENTRY_SIZE,
                });
            }

            let data = &payload[offset..offset + len];
            let header = FragmentHeader {
                len: len as u16,
                generation,
                next: if last { CHAIN_END } else { (chunk + 1) as u8 },
                data_crc: crc32fast::hash(data),
            };
            let span = (1 + len.div_ceil(ENTRY_SIZE)) as u8;
            let entry = Entry::fragment(ns, key, item_type, chunk as u8, span, header);
            let location = self.append(&entry, data)?;
            self.index
                .insert(ItemId::fragment(ns, key, chunk as u8, generation), Slot::new(location, &entry));

            offset += len;
            chunk += 1;
        }
        Ok(chunk as u8)
    }

    /// Install a new head, then flag whatever it replaced as stale
    fn supersede(&mut self, head_id: ItemId, slot: Slot) -> Result<()> {
        let key = head_id.key.clone();
        let ns = head_id.ns;
        if let Some(previous) = self.index.insert(head_id, slot) {
            self.release(ns, &key, previous)?;
        }
        Ok(())
    }

    /// Erase a removed head and, for chains, its fragments
    fn release(&mut self, ns: u8, key: &str, slot: Slot) -> Result<()> {
        self.pages.erase(slot.location)?;
        if let Some(chain) = slot.chain {
            self.erase_generation(ns, key, chain.generation)?;
        }
        Ok(())
    }

    /// Erase every indexed fragment of one chain generation
    fn erase_generation(&mut self, ns: u8, key: &str, generation: u8) -> Result<()> {
        let ids: Vec<ItemId> = self
            .index
            .keys()
            .filter(|id| id.ns == ns && id.key == key && id.chunk != CHUNK_HEAD && id.generation == generation)
            .cloned()
            .collect();
        for id in ids {
            if let Some(slot) = self.index.remove(&id) {
                self.pages.erase(slot.location)?;
            }
        }
        Ok(())
    }

    /// Best-effort cleanup after a failed chain write; recovery drops
    /// whatever this cannot erase
    fn abandon_generation(&mut self, ns: u8, key: &str, generation: u8) {
        if let Err(e) = self.erase_generation(ns, key, generation) {
            warn!(key, error = %e, "could not erase abandoned fragments");
        }
    }

    fn erase(&mut self, ns: u8, key: &str) -> Result<()> {
        let slot = self
            .index
            .remove(&ItemId::head(ns, key))
            .ok_or_else(|| NvsError::KeyNotFound(key.to_string()))?;
        self.release(ns, key, slot)
    }

    fn erase_namespace(&mut self, ns: u8) -> Result<usize> {
        let keys: Vec<String> = self
            .index
            .keys()
            .filter(|id| id.ns == ns && id.chunk == CHUNK_HEAD)
            .map(|id| id.key.clone())
            .collect();
        for key in &keys {
            self.erase(ns, key)?;
        }
        Ok(keys.len())
    }
}

/// Storage engine of one partition
///
/// ## Concurrency
/// - `inner`: every read and write goes through one mutex; operations are
///   short and only block on the medium
/// - `writers`: namespaces currently held by a read-write handle
/// - Read-only access never takes a namespace lock
pub struct PartitionStore {
    partition: Partition,
    config: Config,
    inner: Mutex<StoreInner>,
    writers: Mutex<HashSet<u8>>,
    open_handles: AtomicUsize,
}

impl PartitionStore {
    /// Load a partition, running recovery
    pub fn open(partition: Partition, config: Config) -> Result<Self> {
        let inner = StoreInner::load(partition.clone(), &config)?;
        let stats = inner.pages.stats();
        info!(
            partition = partition.name(),
            pages = stats.page_count,
            used = stats.used_entries,
            namespaces = inner.namespaces.len(),
            "partition loaded"
        );
        Ok(Self {
            partition,
            config,
            inner: Mutex::new(inner),
            writers: Mutex::new(HashSet::new()),
            open_handles: AtomicUsize::new(0),
        })
    }

    /// Partition label
    pub fn name(&self) -> &str {
        self.partition.name()
    }

    /// The partition view backing this store
    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Largest string/blob payload accepted by `write`
    pub fn max_value_size(&self) -> usize {
        self.config.max_value_size
    }

    // =========================================================================
    // Namespaces
    // =========================================================================

    /// Resolve a namespace name to its id
    ///
    /// With `create_if_missing`, an unknown name gets the next free id and
    /// its mapping is written and synced before returning.
    pub fn resolve_namespace(&self, name: &str, create_if_missing: bool) -> Result<u8> {
        self.with_inner(|inner| match inner.namespaces.resolve(name, create_if_missing)? {
            Resolved::Existing(id) => Ok(id),
            Resolved::Allocated(id) => {
                let persisted = inner
                    .write(INDEX_NAMESPACE_ID, name, &Value::U8(id), usize::MAX)
                    .and_then(|_| inner.pages.sync());
                if let Err(e) = persisted {
                    inner.namespaces.forget(name);
                    return Err(e);
                }
                debug!(partition = self.name(), namespace = name, id, "namespace created");
                Ok(id)
            }
        })
    }

    /// All namespaces as (name, id), sorted by id
    pub fn namespaces(&self) -> Result<Vec<(String, u8)>> {
        self.with_inner(|inner| Ok(inner.namespaces.iter()))
    }

    // =========================================================================
    // Items
    // =========================================================================

    /// Read the live value of `key`, which must have type `expected`
    pub fn read(&self, ns: u8, key: &str, expected: ItemType) -> Result<Value> {
        self.with_inner(|inner| inner.read(ns, key, expected))
    }

    /// Type of the live value of `key`, if any
    pub fn item_type(&self, ns: u8, key: &str) -> Result<Option<ItemType>> {
        self.with_inner(|inner| Ok(inner.index.get(&ItemId::head(ns, key)).map(|s| s.item_type)))
    }

    /// Write a value, superseding any previous value of `key`
    pub fn write(&self, ns: u8, key: &str, value: &Value) -> Result<()> {
        let max = self.config.max_value_size;
        self.with_inner(|inner| {
            inner.write(ns, key, value, max)?;
            if self.config.sync_strategy == SyncStrategy::EveryWrite {
                inner.pages.sync()?;
            }
            Ok(())
        })
    }

    /// Flag the live value of `key` stale
    pub fn erase(&self, ns: u8, key: &str) -> Result<()> {
        self.with_inner(|inner| {
            inner.erase(ns, key)?;
            if self.config.sync_strategy == SyncStrategy::EveryWrite {
                inner.pages.sync()?;
            }
            Ok(())
        })
    }

    /// Flag every key of a namespace stale; returns how many were erased
    pub fn erase_namespace(&self, ns: u8) -> Result<usize> {
        self.with_inner(|inner| {
            let count = inner.erase_namespace(ns)?;
            if self.config.sync_strategy == SyncStrategy::EveryWrite {
                inner.pages.sync()?;
            }
            Ok(count)
        })
    }

    /// Live keys of a namespace, sorted by key
    pub fn entries(&self, ns: u8) -> Result<Vec<EntryInfo>> {
        self.with_inner(|inner| {
            let mut entries: Vec<EntryInfo> = inner
                .index
                .iter()
                .filter(|(id, _)| id.ns == ns && id.chunk == CHUNK_HEAD)
                .map(|(id, slot)| EntryInfo {
                    key: id.key.clone(),
                    item_type: slot.item_type,
                })
                .collect();
            entries.sort_by(|a, b| a.key.cmp(&b.key));
            Ok(entries)
        })
    }

    /// Push every applied write to durable state
    pub fn sync(&self) -> Result<()> {
        self.with_inner(|inner| inner.pages.sync())
    }

    /// Usage counters
    pub fn stats(&self) -> Result<StoreStats> {
        self.with_inner(|inner| Ok(StoreStats::from((inner.pages.stats(), inner.namespaces.len()))))
    }

    // =========================================================================
    // Handles and Locks
    // =========================================================================

    /// Take the read-write lock of a namespace
    ///
    /// Fails with `AccessDenied` while another read-write handle holds it.
    pub fn lock_namespace(self: &Arc<Self>, ns: u8, name: &str) -> Result<WriteLock> {
        let mut writers = self.writers.lock();
        if !writers.insert(ns) {
            return Err(NvsError::AccessDenied(format!(
                "namespace {:?} in partition {:?} is already open read-write",
                name,
                self.name()
            )));
        }
        Ok(WriteLock {
            store: Arc::clone(self),
            ns,
        })
    }

    /// Whether a namespace is held by a read-write handle
    pub fn is_locked(&self, ns: u8) -> bool {
        self.writers.lock().contains(&ns)
    }

    /// Number of open handles on this partition
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    pub(crate) fn handle_opened(&self) {
        self.open_handles.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn handle_closed(&self) {
        self.open_handles.fetch_sub(1, Ordering::SeqCst);
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Run `f` against the store state, reloading first if a previous
    /// medium failure left it stale
    fn with_inner<T>(&self, f: impl FnOnce(&mut StoreInner) -> Result<T>) -> Result<T> {
        let mut inner = self.inner.lock();
        if inner.needs_reload {
            warn!(partition = self.name(), "reloading after medium failure");
            *inner = StoreInner::load(self.partition.clone(), &self.config)?;
        }

        let result = f(&mut inner);
        if let Err(e) = &result {
            if e.is_medium() {
                inner.needs_reload = true;
            }
        }
        result
    }
}

/// Read-write lock on one namespace, released on drop
pub struct WriteLock {
    store: Arc<PartitionStore>,
    ns: u8,
}

impl WriteLock {
    /// Namespace id held by this lock
    pub fn namespace_id(&self) -> u8 {
        self.ns
    }
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        self.store.writers.lock().remove(&self.ns);
    }
}
