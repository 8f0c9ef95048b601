use alloy_primitives::Address;
use std::collections::BTreeMap;
use thiserror::Error;

use super::types::{Grant, GrantKey};

/// Errors raised by a grant store backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GrantStoreError {
    /// The backing state could not be read or written.
    #[error("grant store backend error: {0}")]
    Backend(String),
    /// A stored grant could not be decoded.
    #[error("corrupt grant for {grantee} from {granter}: {reason}")]
    Corrupt {
        /// Account allowed to act.
        grantee: Address,
        /// Account that granted the permission.
        granter: Address,
        /// Decoding failure.
        reason: String,
    },
}

/// Key-value storage for grants.
pub trait GrantStore {
    /// Returns the grant stored under `key`, expired or not.
    fn get(&self, key: &GrantKey) -> Result<Option<Grant>, GrantStoreError>;

    /// Stores `grant` under `key`, replacing any previous value.
    fn set(&mut self, key: GrantKey, grant: Grant) -> Result<(), GrantStoreError>;

    /// Removes the grant under `key`, if any.
    fn delete(&mut self, key: &GrantKey) -> Result<(), GrantStoreError>;
}

/// Grants held in memory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemoryGrantStore {
    grants: BTreeMap<GrantKey, Grant>,
}

impl MemoryGrantStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored grants.
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Whether the store holds no grants.
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }

    /// Iterates over all grants in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&GrantKey, &Grant)> {
        self.grants.iter()
    }
}

impl GrantStore for MemoryGrantStore {
    fn get(&self, key: &GrantKey) -> Result<Option<Grant>, GrantStoreError> {
        Ok(self.grants.get(key).cloned())
    }

    fn set(&mut self, key: GrantKey, grant: Grant) -> Result<(), GrantStoreError> {
        self.grants.insert(key, grant);
        Ok(())
    }

    fn delete(&mut self, key: &GrantKey) -> Result<(), GrantStoreError> {
        self.grants.remove(key);
        Ok(())
    }
}

/// Write-buffering branch of a parent store.
///
/// Reads fall through to the parent unless the key was written in the branch. Writes stay in
/// the branch until [`CacheGrantStore::into_changeset`] is applied to the parent; dropping the
/// branch discards them.
pub struct CacheGrantStore<'a> {
    parent: &'a dyn GrantStore,
    dirty: BTreeMap<GrantKey, Option<Grant>>,
}

impl<'a> CacheGrantStore<'a> {
    /// Branches `parent`.
    pub fn new(parent: &'a dyn GrantStore) -> Self {
        Self {
            parent,
            dirty: BTreeMap::new(),
        }
    }

    /// Whether the branch holds uncommitted writes.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    /// Releases the parent borrow and returns the buffered writes.
    pub fn into_changeset(self) -> GrantChangeset {
        GrantChangeset { writes: self.dirty }
    }
}

impl std::fmt::Debug for CacheGrantStore<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheGrantStore")
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl GrantStore for CacheGrantStore<'_> {
    fn get(&self, key: &GrantKey) -> Result<Option<Grant>, GrantStoreError> {
        match self.dirty.get(key) {
            Some(entry) => Ok(entry.clone()),
            None => self.parent.get(key),
        }
    }

    fn set(&mut self, key: GrantKey, grant: Grant) -> Result<(), GrantStoreError> {
        self.dirty.insert(key, Some(grant));
        Ok(())
    }

    fn delete(&mut self, key: &GrantKey) -> Result<(), GrantStoreError> {
        self.dirty.insert(key.clone(), None);
        Ok(())
    }
}

/// Writes buffered by a [`CacheGrantStore`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GrantChangeset {
    writes: BTreeMap<GrantKey, Option<Grant>>,
}

impl GrantChangeset {
    /// Number of buffered writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether nothing was written.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Applies the writes to `store` in key order, stopping at the first failure.
    pub fn write(self, store: &mut dyn GrantStore) -> Result<(), GrantStoreError> {
        for (key, grant) in self.writes {
            match grant {
                Some(grant) => store.set(key, grant)?,
                None => store.delete(&key)?,
            }
        }
        Ok(())
    }
}
