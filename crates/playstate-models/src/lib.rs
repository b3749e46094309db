pub mod entity;
pub mod error;
pub mod event;
pub mod guid;
pub mod priority;

pub use entity::{Entity, EntityType};
pub use error::ModelError;
pub use event::{Event, EventOptions, EventStatus, MAX_LOG_ENTRIES};
pub use guid::Guid;
pub use priority::SourcePriority;
