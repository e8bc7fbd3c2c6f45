use super::{Entry, EntryId, MemoryStore, Persistence, RepostStore, StoreError};
use crate::types::Repost;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

// ============================================================================
// FileStore — MemoryStore plus a whole-table JSON snapshot on disk
// ============================================================================

/// Every `save` overwrites the file with the full table and next id; `load`
/// replaces the in-memory table with whatever the file holds.
pub struct FileStore {
    inner: MemoryStore,
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            inner: MemoryStore::new(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl RepostStore for FileStore {
    fn insert(&mut self, repost: Repost) -> EntryId {
        self.inner.insert(repost)
    }

    fn walk_all(&self, visit: &mut dyn FnMut(&Entry)) {
        self.inner.walk_all(visit)
    }

    fn walk_all_mut(&mut self, visit: &mut dyn FnMut(&mut Entry)) {
        self.inner.walk_all_mut(visit)
    }

    fn delete(&mut self, id: EntryId) {
        self.inner.delete(id)
    }

    fn persistence(&self) -> Option<&dyn Persistence> {
        Some(self)
    }

    fn persistence_mut(&mut self) -> Option<&mut dyn Persistence> {
        Some(self)
    }
}

impl Persistence for FileStore {
    fn load(&mut self) -> Result<(), StoreError> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::NotInitialized(self.path.clone()));
            }
            Err(e) => return Err(self.io_error(e)),
        };

        let table: MemoryStore = serde_json::from_slice(&data)?;
        table.validate()?;

        debug!(
            path = %self.path.display(),
            entries = table.len(),
            next_id = table.next_id(),
            "Loaded store snapshot"
        );
        self.inner = table;
        Ok(())
    }

    fn save(&self) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(&self.inner)?;

        // Write next to the target and rename so a crash never leaves half a file.
        // The staging file must hit the disk before the rename does.
        let staging = self.path.with_extension("tmp");
        let mut file = File::create(&staging).map_err(|e| self.io_error(e))?;
        file.write_all(&encoded).map_err(|e| self.io_error(e))?;
        file.sync_all().map_err(|e| self.io_error(e))?;
        drop(file);
        fs::rename(&staging, &self.path).map_err(|e| self.io_error(e))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Publication, SuggestionRate};
    use chrono::{TimeZone, Utc};

    fn make_repost(id: &str, rate: f64) -> Repost {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Repost::new(Publication::new(id, 4200, at), at, SuggestionRate(rate))
    }

    fn entries(store: &FileStore) -> Vec<Entry> {
        let mut out = Vec::new();
        store.walk_all(&mut |e| out.push(e.clone()));
        out
    }

    #[test]
    fn load_missing_file_reports_not_initialized() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = FileStore::new(dir.path().join("db.json"));

        let result = store.load();

        assert!(matches!(result, Err(StoreError::NotInitialized(_))));
    }

    #[test]
    fn save_then_load_restores_entries_and_counter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        let mut store = FileStore::new(&path);
        store.insert(make_repost("tg/1", 4.5));
        let second = store.insert(make_repost("tg/2", 7.25));
        store.insert(make_repost("tg/3", 12.0));
        store.delete(second);
        store.walk_all_mut(&mut |e| {
            if e.id() == EntryId(1) {
                e.mark_retrieved();
            }
        });
        store.save().unwrap();

        let mut restored = FileStore::new(&path);
        restored.load().unwrap();

        assert_eq!(entries(&restored), entries(&store));
        assert_eq!(restored.inner.next_id(), 4);
        assert_eq!(restored.insert(make_repost("tg/4", 5.0)), EntryId(4));
    }

    #[test]
    fn save_overwrites_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        let mut store = FileStore::new(&path);
        let id = store.insert(make_repost("tg/1", 4.5));
        store.save().unwrap();
        store.delete(id);
        store.save().unwrap();

        let mut restored = FileStore::new(&path);
        restored.load().unwrap();

        assert!(entries(&restored).is_empty());
        assert_eq!(restored.inner.next_id(), 2);
    }

    #[test]
    fn save_replaces_file_without_leaving_staging_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, b"stale").unwrap();

        let mut store = FileStore::new(&path);
        store.insert(make_repost("tg/1", 4.5));
        store.save().unwrap();

        assert!(!path.with_extension("tmp").exists());
        let mut restored = FileStore::new(&path);
        restored.load().unwrap();
        assert_eq!(entries(&restored), entries(&store));
    }

    #[test]
    fn load_malformed_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        fs::write(&path, b"{not json").unwrap();

        let mut store = FileStore::new(&path);

        assert!(matches!(store.load(), Err(StoreError::Malformed(_))));
    }

    #[test]
    fn load_inconsistent_counter_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        let mut store = FileStore::new(&path);
        store.insert(make_repost("tg/1", 4.5));
        store.save().unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        fs::write(&path, raw.replace("\"nextId\":2", "\"nextId\":1")).unwrap();

        let mut restored = FileStore::new(&path);
        assert!(matches!(restored.load(), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn save_into_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("missing").join("db.json"));

        assert!(matches!(store.save(), Err(StoreError::Io { .. })));
    }
}
