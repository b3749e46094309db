pub mod queue;
pub mod repository;

pub use queue::{EventQueue, QueueOptions};
pub use repository::{EventCriteria, EventsRepository, EVENT_COLUMNS};
