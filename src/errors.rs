use thiserror::Error;

/// Engine-level error taxonomy. Transient variants bubble to the tick wrapper
/// which retries on the next period; the rest are terminal per activity.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transient network error: {0}")]
    Transient(String),

    #[error("task store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("task {0} not found")]
    TaskNotFound(uuid::Uuid),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<reqwest::Error> for EngineError {
    fn from(e: reqwest::Error) -> Self {
        EngineError::Transient(e.to_string())
    }
}

impl EngineError {
    /// Whether the next scheduled tick is expected to succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Transient(_))
    }
}
