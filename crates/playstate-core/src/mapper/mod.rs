pub mod export;
pub mod extended;
pub mod import;

use chrono::{DateTime, Utc};
use playstate_models::{Entity, SourcePriority};
use crate::error::StorageError;
use crate::storage::CommitReport;

pub use export::ExportMapper;
pub use extended::{BackendState, ExtendedMemoryMapper, MapperCache, MemoryCache, UserContext};
pub use import::MemoryMapper;

/// Settings shared by every mapper run
#[derive(Debug, Clone, Default)]
pub struct MapperOptions {
    pub priority: SourcePriority,
    /// Compute changes without writing them
    pub dry_run: bool,
}

/// Per item import switches
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    /// Items not newer than this only contribute metadata
    pub after: Option<DateTime<Utc>>,
    /// Never create entities or touch play state
    pub metadata_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Updated,
    Unchanged,
    /// Unknown item offered in metadata only mode
    Skipped,
    Rejected(String),
}

/// In-memory staging area between backends and storage
pub trait ImportMapper {
    fn set_up(&mut self, options: MapperOptions);

    fn load_data(&mut self, since: Option<DateTime<Utc>>) -> Result<(), StorageError>;

    /// Resolve by pointer, merge into a known entity or stage a new one
    fn add(&mut self, entity: Entity, options: &ImportOptions) -> AddOutcome;

    fn get(&self, entity: &Entity) -> Option<&Entity>;

    fn remove(&mut self, entity: &Entity) -> Result<bool, StorageError>;

    fn has(&self, entity: &Entity) -> bool;

    /// Flush staged inserts and updates in one storage batch
    fn commit(&mut self) -> Result<CommitReport, StorageError>;

    fn reset(&mut self);

    fn objects(&self, filter: Option<&dyn Fn(&Entity) -> bool>) -> Vec<&Entity>;

    fn objects_count(&self) -> usize;
}
