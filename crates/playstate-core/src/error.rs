use playstate_models::ModelError;
use thiserror::Error;

/// Failures surfaced by the storage layer and the events repository
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("validation failed: {0}")]
    Validation(#[from] ModelError),

    /// `params` holds the bound values of the failing statement, for logs only
    #[error("storage operation '{operation}' failed: {source}")]
    Query {
        operation: &'static str,
        params: String,
        #[source]
        source: rusqlite::Error,
    },

    #[error("database pool error: {0}")]
    Pool(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("migration error: {0}")]
    Migration(String),
}

impl From<r2d2::Error> for StorageError {
    fn from(err: r2d2::Error) -> Self {
        StorageError::Pool(err.to_string())
    }
}

impl StorageError {
    pub fn is_validation(&self) -> bool {
        matches!(self, StorageError::Validation(_))
    }
}

/// Build a `map_err` adapter that tags a rusqlite error with its operation and parameters
pub(crate) fn query_error<P: std::fmt::Debug>(
    operation: &'static str,
    params: P,
) -> impl FnOnce(rusqlite::Error) -> StorageError {
    move |source| StorageError::Query {
        operation,
        params: format!("{:?}", params),
        source,
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task '{0}' not found")]
    NotFound(String),

    #[error("task '{0}' is already queued")]
    AlreadyQueued(String),

    #[error("task '{0}' is not queued")]
    NotQueued(String),

    #[error("cannot cancel task '{0}' while it is running")]
    Running(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
