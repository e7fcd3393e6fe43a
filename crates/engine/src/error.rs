use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(String),
    #[error("repository error: {0}")]
    Repository(String),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("queue error: {0}")]
    Queue(String),
    #[error("validation: {0}")]
    Validation(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
