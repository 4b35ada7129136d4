//! Namespace Index
//!
//! Maps namespace names to the small integer ids stored in every entry.
//! The mapping itself is persisted as `u8` entries of the reserved
//! namespace 0 (key = name, value = id); this type is the in-memory side,
//! rebuilt from those entries whenever a partition is loaded.

use std::collections::HashMap;

use crate::entry::validate_key;
use crate::error::{NvsError, Result};

/// Namespace id holding the index entries themselves
pub const INDEX_NAMESPACE_ID: u8 = 0;

/// Largest id a namespace can get (0xFF is never a valid id)
pub const MAX_NAMESPACE_ID: u8 = 0xFE;

/// Outcome of resolving a namespace name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved {
    /// The namespace already had an id
    Existing(u8),
    /// A fresh id was allocated; the caller must persist it
    Allocated(u8),
}

/// name → id mapping of one partition
#[derive(Debug, Clone)]
pub struct NamespaceIndex {
    ids: HashMap<String, u8>,
    used: [bool; 256],
    max_id: u8,
}

impl NamespaceIndex {
    /// Empty index handing out ids `1..=max_namespaces`
    pub fn new(max_namespaces: u8) -> Self {
        let mut used = [false; 256];
        used[INDEX_NAMESPACE_ID as usize] = true;
        Self {
            ids: HashMap::new(),
            used,
            max_id: max_namespaces.min(MAX_NAMESPACE_ID),
        }
    }

    /// Record a mapping found on flash during recovery
    ///
    /// Returns false when the id is out of range or already taken, in
    /// which case the mapping is ignored.
    pub fn restore(&mut self, name: &str, id: u8) -> bool {
        if id == INDEX_NAMESPACE_ID || id > MAX_NAMESPACE_ID || self.used[id as usize] {
            return false;
        }
        if self.ids.contains_key(name) {
            return false;
        }
        self.used[id as usize] = true;
        self.ids.insert(name.to_string(), id);
        true
    }

    /// Id of an existing namespace
    pub fn get(&self, name: &str) -> Option<u8> {
        self.ids.get(name).copied()
    }

    /// Resolve a name, allocating the lowest free id if allowed
    ///
    /// Fails with `NamespaceNotFound` when the name is unknown and
    /// creation is disallowed, `NamespaceFull` when no id is left.
    pub fn resolve(&mut self, name: &str, create_if_missing: bool) -> Result<Resolved> {
        validate_key(name)?;

        if let Some(id) = self.get(name) {
            return Ok(Resolved::Existing(id));
        }
        if !create_if_missing {
            return Err(NvsError::NamespaceNotFound(name.to_string()));
        }

        let id = (1..=self.max_id)
            .find(|&id| !self.used[id as usize])
            .ok_or(NvsError::NamespaceFull)?;

        self.used[id as usize] = true;
        self.ids.insert(name.to_string(), id);
        Ok(Resolved::Allocated(id))
    }

    /// Undo an allocation whose index entry could not be persisted
    pub fn forget(&mut self, name: &str) {
        if let Some(id) = self.ids.remove(name) {
            self.used[id as usize] = false;
        }
    }

    /// Number of namespaces
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// All (name, id) pairs, sorted by id
    pub fn iter(&self) -> Vec<(String, u8)> {
        let mut all: Vec<(String, u8)> = self.ids.iter().map(|(n, &id)| (n.clone(), id)).collect();
        all.sort_by_key(|(_, id)| *id);
        all
    }
}
