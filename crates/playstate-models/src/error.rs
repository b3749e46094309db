use thiserror::Error;
use crate::event::EventStatus;

/// Validation failures raised by the model layer
///
/// These are never retried: they describe malformed input.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid entity: {0}")]
    InvalidEntity(String),

    #[error("unsupported guid scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("invalid value '{value}' for '{scheme}' guid, expecting '{example}'")]
    InvalidGuid {
        scheme: String,
        value: String,
        example: String,
    },

    #[error("invalid event status value {0}")]
    InvalidStatus(i64),

    #[error("cannot move event from '{from}' to '{to}'")]
    InvalidTransition { from: EventStatus, to: EventStatus },

    #[error("cannot cancel an event while it is running")]
    CancelRunning,
}
