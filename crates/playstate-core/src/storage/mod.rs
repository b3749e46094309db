pub mod migrations;
pub mod sqlite;

#[cfg(test)]
pub(crate) mod testing;

use chrono::{DateTime, Utc};
use playstate_models::{Entity, EntityType};
use serde::Serialize;
use crate::error::StorageError;

pub use migrations::MigrationDirection;
pub use sqlite::SqliteStorage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitCounts {
    pub added: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Per type outcome of a bulk commit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommitReport {
    pub movie: CommitCounts,
    pub episode: CommitCounts,
    /// Storage id per committed entity in input order, `None` where it failed
    #[serde(skip)]
    pub ids: Vec<Option<i64>>,
}

impl CommitReport {
    pub fn counts_mut(&mut self, entity_type: EntityType) -> &mut CommitCounts {
        match entity_type {
            EntityType::Movie => &mut self.movie,
            EntityType::Episode => &mut self.episode,
        }
    }

    pub fn added(&self) -> usize {
        self.movie.added + self.episode.added
    }

    pub fn updated(&self) -> usize {
        self.movie.updated + self.episode.updated
    }

    pub fn failed(&self) -> usize {
        self.movie.failed + self.episode.failed
    }

    pub fn merge(&mut self, other: &CommitReport) {
        for (mine, theirs) in [(&mut self.movie, &other.movie), (&mut self.episode, &other.episode)] {
            mine.added += theirs.added;
            mine.updated += theirs.updated;
            mine.failed += theirs.failed;
        }
        self.ids.extend(other.ids.iter().copied());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MaintenanceReport {
    pub integrity_ok: bool,
    pub messages: Vec<String>,
}

/// Persistence contract for canonical entities
///
/// Implementations never cache: the mappers own caching.
pub trait StateStorage: Send + Sync {
    /// Persist a new entity, fails when it already carries an id
    fn insert(&self, entity: &Entity) -> Result<Entity, StorageError>;

    /// Lookup by id, then the `via` backend local id, then relative pointers, then pointers
    fn get(&self, entity: &Entity) -> Result<Option<Entity>, StorageError>;

    /// Everything updated at or after `since`, or the whole table
    fn get_all(&self, since: Option<DateTime<Utc>>) -> Result<Vec<Entity>, StorageError>;

    fn count(&self, since: Option<DateTime<Utc>>) -> Result<usize, StorageError>;

    fn update(&self, entity: &Entity) -> Result<Entity, StorageError>;

    /// First candidate, in the given order, whose pointer is stored wins
    fn match_any_id(&self, ids: &[(String, String)]) -> Result<Option<Entity>, StorageError>;

    fn remove(&self, entity: &Entity) -> Result<bool, StorageError>;

    /// Insert unseen entities and update known ones in a single transaction
    fn commit(&self, entities: Vec<Entity>) -> Result<CommitReport, StorageError>;

    fn migrate(&self, direction: MigrationDirection) -> Result<(), StorageError>;

    fn is_migrated(&self) -> Result<bool, StorageError>;

    fn maintenance(&self) -> Result<MaintenanceReport, StorageError>;
}
