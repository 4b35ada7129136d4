//! Handle Module
//!
//! Caller-facing session object bound to one (partition, namespace, mode).
//!
//! ## Responsibilities
//! - Typed get/set for every storable type, plus erase
//! - Stage writes until `commit()`; reads see staged values first
//! - Enforce the access mode (`ReadOnlyViolation`) and open state
//! - Hold the namespace write lock for read-write handles
//!
//! ## Write Path
//! ```text
//! set_*/erase ──► pending (in call order)
//!                     │ commit()
//!                     ▼
//!              PartitionStore::write / erase ──► sync()
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::entry::{validate_key, ItemType, Value};
use crate::error::{NvsError, Result};
use crate::storage::{EntryInfo, PartitionStore, WriteLock};

/// Access mode of a handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// Rust types that map onto one stored type tag
pub trait StoredType: Sized {
    const ITEM_TYPE: ItemType;

    fn into_value(self) -> Value;

    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! stored_type {
    ($ty:ty, $variant:ident) => {
        impl StoredType for $ty {
            const ITEM_TYPE: ItemType = ItemType::$variant;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

stored_type!(u8, U8);
stored_type!(i8, I8);
stored_type!(u16, U16);
stored_type!(i16, I16);
stored_type!(u32, U32);
stored_type!(i32, I32);
stored_type!(u64, U64);
stored_type!(i64, I64);
stored_type!(String, Str);
stored_type!(Vec<u8>, Blob);

/// A write waiting for `commit()`
#[derive(Debug, Clone)]
enum PendingOp {
    Set { key: String, value: Value },
    Erase { key: String },
    EraseAll,
}

/// What the staged writes say about a key
enum Staged<'a> {
    Value(&'a Value),
    Erased,
}

/// Open session on one namespace
///
/// Dropping a handle closes it (releasing the write lock) without
/// committing staged writes.
pub struct Handle {
    store: Arc<PartitionStore>,
    namespace: String,
    ns: u8,
    mode: OpenMode,
    open: bool,
    lock: Option<WriteLock>,
    pending: Vec<PendingOp>,
}

impl Handle {
    /// Open a handle on `namespace` of an initialized partition store
    ///
    /// Read-write opens create the namespace if needed and take its write
    /// lock (`AccessDenied` if already held); read-only opens fail with
    /// `NamespaceNotFound` for unknown namespaces.
    pub fn open(store: Arc<PartitionStore>, namespace: &str, mode: OpenMode) -> Result<Self> {
        let writable = mode == OpenMode::ReadWrite;
        let ns = store.resolve_namespace(namespace, writable)?;
        let lock = if writable {
            Some(store.lock_namespace(ns, namespace)?)
        } else {
            None
        };

        store.handle_opened();
        debug!(partition = store.name(), namespace, ns, ?mode, "handle opened");

        Ok(Self {
            store,
            namespace: namespace.to_string(),
            ns,
            mode,
            open: true,
            lock,
            pending: Vec::new(),
        })
    }

    // =========================================================================
    // Generic Access
    // =========================================================================

    /// Read `key` as `T`
    pub fn get<T: StoredType>(&self, key: &str) -> Result<T> {
        let value = self.get_value(key, T::ITEM_TYPE)?;
        T::from_value(value).ok_or_else(|| NvsError::CorruptEntry(format!("{:?}: decoded wrong type", key)))
    }

    /// Stage `key = value`
    pub fn set<T: StoredType>(&mut self, key: &str, value: T) -> Result<()> {
        self.set_value(key, value.into_value())
    }

    /// Read `key`, which must hold a value of type `expected`
    pub fn get_value(&self, key: &str, expected: ItemType) -> Result<Value> {
        self.ensure_open()?;
        validate_key(key)?;

        match self.staged(key) {
            Some(Staged::Value(value)) if value.item_type() == expected => Ok(value.clone()),
            Some(Staged::Value(value)) => Err(NvsError::TypeMismatch {
                key: key.to_string(),
                expected,
                found: value.item_type(),
            }),
            Some(Staged::Erased) => Err(NvsError::KeyNotFound(key.to_string())),
            None => self.store.read(self.ns, key, expected),
        }
    }

    /// Stage a typed value for `key`
    pub fn set_value(&mut self, key: &str, value: Value) -> Result<()> {
        self.ensure_writable()?;
        validate_key(key)?;

        if let Some(payload) = value.payload() {
            let max = self.store.max_value_size();
            if payload.len() > max {
                return Err(NvsError::ValueTooLarge {
                    len: payload.len(),
                    max,
                });
            }
        }

        self.pending.push(PendingOp::Set {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    // =========================================================================
    // Typed Accessors
    // =========================================================================

    pub fn get_i8(&self, key: &str) -> Result<i8> {
        self.get(key)
    }

    pub fn get_u8(&self, key: &str) -> Result<u8> {
        self.get(key)
    }

    pub fn get_i16(&self, key: &str) -> Result<i16> {
        self.get(key)
    }

    pub fn get_u16(&self, key: &str) -> Result<u16> {
        self.get(key)
    }

    pub fn get_i32(&self, key: &str) -> Result<i32> {
        self.get(key)
    }

    pub fn get_u32(&self, key: &str) -> Result<u32> {
        self.get(key)
    }

    pub fn get_i64(&self, key: &str) -> Result<i64> {
        self.get(key)
    }

    pub fn get_u64(&self, key: &str) -> Result<u64> {
        self.get(key)
    }

    pub fn get_str(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    pub fn get_blob(&self, key: &str) -> Result<Vec<u8>> {
        self.get(key)
    }

    pub fn set_i8(&mut self, key: &str, value: i8) -> Result<()> {
        self.set(key, value)
    }

    pub fn set_u8(&mut self, key: &str, value: u8) -> Result<()> {
        self.set(key, value)
    }

    pub fn set_i16(&mut self, key: &str, value: i16) -> Result<()> {
        self.set(key, value)
    }

    pub fn set_u16(&mut self, key: &str, value: u16) -> Result<()> {
        self.set(key, value)
    }

    pub fn set_i32(&mut self, key: &str, value: i32) -> Result<()> {
        self.set(key, value)
    }

    pub fn set_u32(&mut self, key: &str, value: u32) -> Result<()> {
        self.set(key, value)
    }

    pub fn set_i64(&mut self, key: &str, value: i64) -> Result<()> {
        self.set(key, value)
    }

    pub fn set_u64(&mut self, key: &str, value: u64) -> Result<()> {
        self.set(key, value)
    }

    pub fn set_str(&mut self, key: &str, value: &str) -> Result<()> {
        self.set(key, value.to_string())
    }

    pub fn set_blob(&mut self, key: &str, value: &[u8]) -> Result<()> {
        self.set(key, value.to_vec())
    }

    // =========================================================================
    // Erase
    // =========================================================================

    /// Stage removal of `key`
    ///
    /// Fails with `KeyNotFound` if the key has no value right now.
    pub fn erase_key(&mut self, key: &str) -> Result<()> {
        self.ensure_writable()?;
        validate_key(key)?;

        let exists = match self.staged(key) {
            Some(Staged::Value(_)) => true,
            Some(Staged::Erased) => false,
            None => self.store.item_type(self.ns, key)?.is_some(),
        };
        if !exists {
            return Err(NvsError::KeyNotFound(key.to_string()));
        }

        self.pending.push(PendingOp::Erase {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Stage removal of every key in the namespace
    pub fn erase_all(&mut self) -> Result<()> {
        self.ensure_writable()?;
        self.pending.push(PendingOp::EraseAll);
        Ok(())
    }

    // =========================================================================
    // Commit / Close
    // =========================================================================

    /// Apply staged writes in call order and sync the medium
    ///
    /// On failure, the write that failed and everything after it stay
    /// staged. A commit on a read-only handle is a no-op.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.mode == OpenMode::ReadOnly {
            return Ok(());
        }

        let staged = std::mem::take(&mut self.pending);
        let count = staged.len();
        let mut ops = staged.into_iter();

        while let Some(op) = ops.next() {
            if let Err(e) = self.apply(&op) {
                self.pending.push(op);
                self.pending.extend(ops);
                return Err(e);
            }
        }

        self.store.sync()?;
        debug!(
            partition = self.store.name(),
            namespace = %self.namespace,
            writes = count,
            "handle committed"
        );
        Ok(())
    }

    /// Close the handle, discarding uncommitted writes
    ///
    /// Idempotent. Releases the namespace write lock if held.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }

        if !self.pending.is_empty() {
            debug!(
                partition = self.store.name(),
                namespace = %self.namespace,
                discarded = self.pending.len(),
                "closing with uncommitted writes"
            );
        }
        self.pending.clear();
        self.lock = None;
        self.open = false;
        self.store.handle_closed();
        debug!(partition = self.store.name(), namespace = %self.namespace, "handle closed");
        Ok(())
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    /// Live keys as this handle sees them (staged writes included)
    pub fn keys(&self) -> Result<Vec<EntryInfo>> {
        self.ensure_open()?;

        let mut keys: BTreeMap<String, ItemType> = self
            .store
            .entries(self.ns)?
            .into_iter()
            .map(|info| (info.key, info.item_type))
            .collect();

        for op in &self.pending {
            match op {
                PendingOp::Set { key, value } => {
                    keys.insert(key.clone(), value.item_type());
                }
                PendingOp::Erase { key } => {
                    keys.remove(key);
                }
                PendingOp::EraseAll => keys.clear(),
            }
        }

        Ok(keys
            .into_iter()
            .map(|(key, item_type)| EntryInfo { key, item_type })
            .collect())
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Namespace id inside the partition
    pub fn namespace_id(&self) -> u8 {
        self.ns
    }

    pub fn partition(&self) -> &str {
        self.store.name()
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of writes waiting for `commit()`
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if !self.open {
            return Err(NvsError::HandleClosed);
        }
        Ok(())
    }

    fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if self.mode == OpenMode::ReadOnly {
            return Err(NvsError::ReadOnlyViolation);
        }
        Ok(())
    }

    /// Newest staged operation affecting `key`
    fn staged(&self, key: &str) -> Option<Staged<'_>> {
        for op in self.pending.iter().rev() {
            match op {
                PendingOp::Set { key: k, value } if k == key => return Some(Staged::Value(value)),
                PendingOp::Erase { key: k } if k == key => return Some(Staged::Erased),
                PendingOp::EraseAll => return Some(Staged::Erased),
                _ => {}
            }
        }
        None
    }

    fn apply(&self, op: &PendingOp) -> Result<()> {
        match op {
            PendingOp::Set { key, value } => self.store.write(self.ns, key, value),
            PendingOp::Erase { key } => match self.store.erase(self.ns, key) {
                Err(NvsError::KeyNotFound(_)) => Ok(()),
                other => other,
            },
            PendingOp::EraseAll => self.store.erase_namespace(self.ns).map(|_| ()),
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
