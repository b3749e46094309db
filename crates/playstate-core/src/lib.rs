pub mod db;
pub mod error;
pub mod events;
pub mod mapper;
pub mod requests;
pub mod scheduler;
pub mod storage;

pub use db::{open_memory_pool, open_pool, ConnectionPool};
pub use error::{SchedulerError, StorageError};
pub use events::{EventCriteria, EventQueue, EventsRepository, QueueOptions};
pub use mapper::{
    AddOutcome, BackendState, ExportMapper, ExtendedMemoryMapper, ImportMapper, ImportOptions, MapperCache,
    MapperOptions, MemoryCache, MemoryMapper, UserContext,
};
pub use requests::{OutboundRequest, RequestAction, RequestQueue};
pub use scheduler::{TaskScheduler, TaskView, TASK_EVENT};
pub use storage::{CommitReport, MaintenanceReport, MigrationDirection, SqliteStorage, StateStorage};
