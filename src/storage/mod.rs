use crate::types::Repost;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

pub mod file;
pub use file::FileStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Nothing has been persisted yet; callers start with an empty store.
    #[error("cannot initialize store as the source {0} does not exist")]
    NotInitialized(PathBuf),
    #[error("cannot access store file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot decode store snapshot: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("store snapshot is inconsistent: {0}")]
    Corrupt(String),
}

// ============================================================================
// Entry
// ============================================================================

/// Sequence number assigned by a store on insert. Starts at 1, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    id: EntryId,
    repost: Repost,
    retrieved_at_least_once: bool,
}

impl Entry {
    pub fn id(&self) -> EntryId {
        self.id
    }

    pub fn repost(&self) -> &Repost {
        &self.repost
    }

    pub fn is_retrieved(&self) -> bool {
        self.retrieved_at_least_once
    }

    /// Once retrieved, an entry stays retrieved.
    pub fn mark_retrieved(&mut self) {
        self.retrieved_at_least_once = true;
    }
}

// ============================================================================
// RepostStore trait
// ============================================================================

/// Keyed table of repost entries.
///
/// Persistence is an optional capability: stores that can load and save a
/// durable image expose it through `persistence`/`persistence_mut`.
pub trait RepostStore: Send + Sync {
    /// Store a fresh, unretrieved entry for `repost` under the next id.
    fn insert(&mut self, repost: Repost) -> EntryId;

    fn walk_all(&self, visit: &mut dyn FnMut(&Entry));

    fn walk_all_mut(&mut self, visit: &mut dyn FnMut(&mut Entry));

    fn delete(&mut self, id: EntryId);

    fn persistence(&self) -> Option<&dyn Persistence> {
        None
    }

    fn persistence_mut(&mut self) -> Option<&mut dyn Persistence> {
        None
    }
}

pub trait Persistence {
    /// Replace the in-memory table with the durable image.
    fn load(&mut self) -> Result<(), StoreError>;

    /// Durably write the whole in-memory table.
    fn save(&self) -> Result<(), StoreError>;
}

// ============================================================================
// MemoryStore
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStore {
    entries: BTreeMap<EntryId, Entry>,
    next_id: u64,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            next_id: 1,
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// Check that the table could have been produced by this store.
    pub(crate) fn validate(&self) -> Result<(), StoreError> {
        if self.next_id == 0 {
            return Err(StoreError::Corrupt("next id must start at 1".to_string()));
        }
        for (key, entry) in &self.entries {
            if *key != entry.id {
                return Err(StoreError::Corrupt(format!(
                    "entry {} is filed under id {}",
                    entry.id, key
                )));
            }
            if key.0 >= self.next_id {
                return Err(StoreError::Corrupt(format!(
                    "entry {} is not below next id {}",
                    key, self.next_id
                )));
            }
        }
        Ok(())
    }
}

impl RepostStore for MemoryStore {
    fn insert(&mut self, repost: Repost) -> EntryId {
        let id = EntryId(self.next_id);
        self.entries.insert(
            id,
            Entry {
                id,
                repost,
                retrieved_at_least_once: false,
            },
        );
        self.next_id += 1;
        id
    }

    fn walk_all(&self, visit: &mut dyn FnMut(&Entry)) {
        self.entries.values().for_each(visit);
    }

    fn walk_all_mut(&mut self, visit: &mut dyn FnMut(&mut Entry)) {
        self.entries.values_mut().for_each(visit);
    }

    fn delete(&mut self, id: EntryId) {
        self.entries.remove(&id);
    }
}

// ============================================================================
// Test utilities
// ============================================================================
