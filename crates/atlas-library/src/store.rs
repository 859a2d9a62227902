//! Identity cache: one shared instance per record id

use crate::LibraryError;
use crate::record::{Record, RecordData, RecordId, SharedData, find_record_id};
use crate::transaction::Transaction;
use rusqlite::params;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

/// Dead entries are swept once the map grows past this many slots
const MIN_SWEEP_THRESHOLD: usize = 64;

struct Registry {
    slots: HashMap<RecordId, Weak<RwLock<RecordData>>>,
    sweep_at: usize,
}

/// Maps record ids to the single live instance of each record.
///
/// The registry holds weak references: an instance lives as long as some
/// [`Record`] handle does, and the next lookup after the last handle is
/// gone loads a fresh one. The mutex guards only the map and is never held
/// while loading from storage or while a record's own lock is taken.
pub struct RecordStore {
    registry: Mutex<Registry>,
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordStore {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                slots: HashMap::new(),
                sweep_at: MIN_SWEEP_THRESHOLD,
            }),
        }
    }

    /// Handle for `id`, loading it through `txn` on first access
    pub fn get(&self, id: RecordId, txn: &Transaction<'_>) -> Result<Record, LibraryError> {
        if let Some(record) = self.lookup(id) {
            return Ok(record);
        }

        let data = RecordData::load(id, txn)?;
        Ok(self.adopt(data))
    }

    /// Cached handle for `id` without touching storage
    pub fn lookup(&self, id: RecordId) -> Option<Record> {
        self.lock()
            .slots
            .get(&id)
            .and_then(Weak::upgrade)
            .map(|shared| Record::from_shared(id, shared))
    }

    /// Cache freshly built record state.
    ///
    /// If a live instance for the same id appeared in the meantime, that
    /// instance wins and `data` is discarded.
    pub fn adopt(&self, data: RecordData) -> Record {
        let id = data.id();
        let mut registry = self.lock();

        if let Some(existing) = registry.slots.get(&id).and_then(Weak::upgrade) {
            tracing::trace!("Record {} already cached, discarding new instance", id);
            return Record::from_shared(id, existing);
        }

        if registry.slots.len() >= registry.sweep_at {
            registry.slots.retain(|_, slot| slot.strong_count() > 0);
            registry.sweep_at = (registry.slots.len() * 2).max(MIN_SWEEP_THRESHOLD);
        }

        let shared: SharedData = Arc::new(RwLock::new(data));
        registry.slots.insert(id, Arc::downgrade(&shared));
        Record::from_shared(id, shared)
    }

    /// Create a new record for the identity triple.
    ///
    /// Fails with [`LibraryError::IdentityConflict`] carrying the existing
    /// record when the triple is taken. If `txn` rolls back, the new cache
    /// slot is dropped with it.
    pub fn import(
        &self,
        title: &str,
        creator: &str,
        engine: &str,
        txn: &Transaction<'_>,
    ) -> Result<Record, LibraryError> {
        if let Some(id) = find_record_id(title, creator, engine, txn)? {
            return Err(LibraryError::IdentityConflict {
                existing: self.get(id, txn)?,
            });
        }

        let data = RecordData::insert(title, creator, engine, txn)?;
        let id = data.id();
        let record = self.adopt(data);
        txn.release_on_rollback(&record);

        tracing::debug!("Created record {} for '{}' by '{}'", id, title, creator);
        Ok(record)
    }

    /// Delete the record and everything attached to it. The cache slot is
    /// released once the deletion is durable; outstanding handles become
    /// detached and reject further mutations.
    pub fn delete(&self, record: &Record, txn: &Transaction<'_>) -> Result<(), LibraryError> {
        let id = record.id();
        let removed = txn
            .conn()
            .execute("DELETE FROM records WHERE record_id = ?1", params![id])?;
        if removed == 0 {
            return Err(LibraryError::RecordNotFound(id));
        }

        let records = txn.records();
        let record = record.clone();
        txn.on_commit(move || records.release(&record));
        Ok(())
    }

    /// Detach `record` and drop its slot if the slot still holds it
    pub(crate) fn release(&self, record: &Record) {
        record.detach();
        let mut registry = self.lock();
        let same = registry
            .slots
            .get(&record.id())
            .and_then(Weak::upgrade)
            .is_some_and(|shared| record.is_instance(&shared));
        if same {
            registry.slots.remove(&record.id());
        }
    }

    /// Forget the cache slot for `id`
    pub fn evict(&self, id: RecordId) -> bool {
        self.lock().slots.remove(&id).is_some()
    }

    /// Number of instances currently alive
    pub fn cached_count(&self) -> usize {
        self.lock()
            .slots
            .values()
            .filter(|slot| slot.strong_count() > 0)
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
