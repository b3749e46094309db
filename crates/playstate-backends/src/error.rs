use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{backend}: request failed: {source}")]
    Http {
        backend: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non success status, `body` is the raw response text
    #[error("{backend}: '{action}' returned unexpected status {status}: {body}")]
    Status {
        backend: String,
        action: &'static str,
        status: u16,
        body: String,
    },

    #[error("{backend}: invalid response: {message}")]
    InvalidResponse { backend: String, message: String },

    #[error("{backend}: item '{id}' not found")]
    NotFound { backend: String, id: String },

    #[error("{backend}: {message}")]
    Token { backend: String, message: String },

    #[error("{backend}: '{operation}' is not supported by this backend")]
    Unsupported { backend: String, operation: &'static str },

    #[error("invalid backend configuration: {0}")]
    Config(String),
}

impl BackendError {
    pub fn http(backend: &str) -> impl FnOnce(reqwest::Error) -> BackendError + '_ {
        move |source| BackendError::Http {
            backend: backend.to_string(),
            source,
        }
    }

    pub fn invalid(backend: &str, message: impl Into<String>) -> Self {
        BackendError::InvalidResponse {
            backend: backend.to_string(),
            message: message.into(),
        }
    }
}
