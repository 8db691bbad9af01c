use baton_core::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
