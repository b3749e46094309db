use chrono::{DateTime, Utc};
use playstate_models::Entity;
use std::sync::atomic::{AtomicUsize, Ordering};
use crate::db::open_memory_pool;
use crate::error::StorageError;
use crate::storage::{CommitReport, MaintenanceReport, MigrationDirection, SqliteStorage, StateStorage};

/// In-memory storage that counts point lookups
pub(crate) struct CountingStorage {
    inner: SqliteStorage,
    lookups: AtomicUsize,
}

impl CountingStorage {
    pub(crate) fn new() -> Self {
        let inner = SqliteStorage::new(open_memory_pool().unwrap());
        inner.migrate(MigrationDirection::Up).unwrap();
        Self {
            inner,
            lookups: AtomicUsize::new(0),
        }
    }

    /// Number of `get` and `match_any_id` calls so far
    pub(crate) fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl StateStorage for CountingStorage {
    fn insert(&self, entity: &Entity) -> Result<Entity, StorageError> {
        self.inner.insert(entity)
    }

    fn get(&self, entity: &Entity) -> Result<Option<Entity>, StorageError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.get(entity)
    }

    fn get_all(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Entity>, StorageError> {
        self.inner.get_all(since)
    }

    fn count(&self, since: Option<DateTime<Utc>>) -> Result<usize, StorageError> {
        self.inner.count(since)
    }

    fn update(&self, entity: &Entity) -> Result<Entity, StorageError> {
        self.inner.update(entity)
    }

    fn match_any_id(&self, ids: &[(String, String)]) -> Result<Option<Entity>, StorageError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.inner.match_any_id(ids)
    }

    fn remove(&self, entity: &Entity) -> Result<bool, StorageError> {
        self.inner.remove(entity)
    }

    fn commit(&self, entities: Vec<Entity>) -> Result<CommitReport, StorageError> {
        self.inner.commit(entities)
    }

    fn migrate(&self, direction: MigrationDirection) -> Result<(), StorageError> {
        self.inner.migrate(direction)
    }

    fn is_migrated(&self) -> Result<bool, StorageError> {
        self.inner.is_migrated()
    }

    fn maintenance(&self) -> Result<MaintenanceReport, StorageError> {
        self.inner.maintenance()
    }
}
