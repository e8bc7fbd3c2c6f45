use crate::clock::Clock;
use crate::selection::Candidate;
use crate::storage::{EntryId, RepostStore, StoreError};
use crate::types::{Publication, Repost};
use chrono::Duration;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use thiserror::Error;
use tracing::{debug, info};

/// Reposts older than this are dropped by `purge_irrelevant`, once read.
const PURGE_AFTER_HOURS: i64 = 48;

/// The in-memory operation went through, but writing it to durable storage
/// did not. `value` is what the operation produced; memory stays authoritative
/// until the next successful save.
#[derive(Debug, Error)]
#[error("change applied in memory but not persisted: {source}")]
pub struct PersistFailed<T: fmt::Debug> {
    pub value: T,
    #[source]
    pub source: StoreError,
}

#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("storage can't be emptied, as there are reposts that have not yet been pulled")]
    UnreadPending,
    #[error(transparent)]
    PersistFailed(#[from] PersistFailed<usize>),
}

// ============================================================================
// RepostService
// ============================================================================

/// Read-once queue of reposts on top of a `RepostStore`.
///
/// Every operation holds the store lock for its whole scan or mutation, so
/// the poller and the read API never interleave at entry level. The lock is
/// always there; callers cannot opt out of it. Stores with the persistence
/// capability are saved after each mutation, under the write lock.
///
/// All operations are synchronous and may block on disk I/O while holding the
/// lock. Async callers should keep them short or move them onto the blocking
/// pool, as the read API does for `purge_irrelevant`.
pub struct RepostService<S> {
    store: RwLock<S>,
    clock: Arc<dyn Clock>,
}

impl<S: RepostStore> RepostService<S> {
    /// Wrap `store` without touching durable storage.
    pub fn new(store: S, clock: Arc<dyn Clock>) -> Self {
        Self {
            store: RwLock::new(store),
            clock,
        }
    }

    /// Wrap `store`, first restoring it from durable storage if it has any.
    ///
    /// A store that was never saved starts empty; any other load failure is
    /// returned.
    pub fn open(mut store: S, clock: Arc<dyn Clock>) -> Result<Self, StoreError> {
        if let Some(persistence) = store.persistence_mut() {
            match persistence.load() {
                Ok(()) => {}
                Err(StoreError::NotInitialized(path)) => {
                    info!(path = %path.display(), "No store snapshot yet, starting empty");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Self::new(store, clock))
    }

    /// Record `candidate` as this cycle's pick.
    pub fn repost(&self, candidate: Candidate) -> Result<Repost, PersistFailed<Repost>> {
        let repost = Repost::new(candidate.publication, self.clock.now(), candidate.rate);

        let mut store = self.write();
        let id = store.insert(repost.clone());
        debug!(entry = %id, publication = %repost.publication.id, "Inserted repost");

        persist(&*store, repost)
    }

    /// Collect every repost that has not been picked up yet.
    ///
    /// With `clear_up` the collected entries are marked retrieved in the same
    /// pass, so each one is handed out once. Without it the call is a dry run.
    pub fn pick_up_most_trending(
        &self,
        clear_up: bool,
    ) -> Result<Vec<Repost>, PersistFailed<Vec<Repost>>> {
        let mut reposts = Vec::new();

        if !clear_up {
            self.read().walk_all(&mut |e| {
                if !e.is_retrieved() {
                    reposts.push(e.repost().clone());
                }
            });
            return Ok(reposts);
        }

        let mut store = self.write();
        store.walk_all_mut(&mut |e| {
            if !e.is_retrieved() {
                reposts.push(e.repost().clone());
                e.mark_retrieved();
            }
        });

        if reposts.is_empty() {
            return Ok(reposts);
        }
        persist(&*store, reposts)
    }

    /// Delete reposts older than the purge window, all or nothing.
    ///
    /// Refuses with `UnreadPending` if any of them was never picked up.
    /// Returns the number of deleted entries.
    pub fn purge_irrelevant(&self) -> Result<usize, PurgeError> {
        let threshold = self.clock.now() - Duration::hours(PURGE_AFTER_HOURS);

        let mut store = self.write();
        let mut expired: Vec<EntryId> = Vec::new();
        let mut unread_found = false;
        store.walk_all(&mut |e| {
            if e.repost().reposted_at < threshold {
                unread_found |= !e.is_retrieved();
                expired.push(e.id());
            }
        });

        if unread_found {
            return Err(PurgeError::UnreadPending);
        }
        if expired.is_empty() {
            return Ok(0);
        }

        for id in &expired {
            store.delete(*id);
        }
        info!(deleted = expired.len(), "Purged irrelevant reposts");

        Ok(persist(&*store, expired.len())?)
    }

    /// Whether `publication` was ever reposted (and not purged since).
    pub fn exists_for_publication(&self, publication: &Publication) -> bool {
        let mut exists = false;
        self.read().walk_all(&mut |e| {
            exists |= e.repost().publication.id == publication.id;
        });
        exists
    }

    // A poisoned lock only means another caller panicked mid-visit; entries
    // are whole values, so the table is still usable.
    fn read(&self) -> RwLockReadGuard<'_, S> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, S> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn persist<S, T>(store: &S, value: T) -> Result<T, PersistFailed<T>>
where
    S: RepostStore,
    T: fmt::Debug,
{
    match store.persistence().map(|p| p.save()) {
        Some(Err(source)) => Err(PersistFailed { value, source }),
        _ => Ok(value),
    }
}
