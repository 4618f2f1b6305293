//! Annotation error types.

use paperlens_config::ConfigError;
use paperlens_db::DbError;
use paperlens_embed::EmbedError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AnnotateError>;

#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error("Invalid method name '{0}': '.' and '$' are reserved")]
    InvalidName(String),

    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Store transaction failed: {0}")]
    StoreTransaction(#[source] DbError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Model inference failed: {0}")]
    ModelInference(#[from] EmbedError),

    #[error("Worker pool error: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DbError> for AnnotateError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Codec(msg) => AnnotateError::Serialization(msg),
            DbError::InvalidFieldKey(key) => AnnotateError::InvalidName(key),
            other => AnnotateError::StoreTransaction(other),
        }
    }
}

impl From<ConfigError> for AnnotateError {
    fn from(err: ConfigError) -> Self {
        AnnotateError::Config(err.to_string())
    }
}
