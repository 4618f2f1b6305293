//! Errors raised by the document store and its backends.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, DbError>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("lancedb: {0}")]
    LanceDb(String),

    #[error("arrow batch: {0}")]
    Arrow(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("document JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Vector codec error: {0}")]
    Codec(String),

    #[error("Duplicate document: {0}")]
    Duplicate(String),

    #[error("Invalid field key '{0}': '.' and '$' are reserved")]
    InvalidFieldKey(String),

    #[error("documents table missing; call initialize() first")]
    NotInitialized,

    #[error("Transaction aborted: {0}")]
    Transaction(String),
}

impl From<lancedb::Error> for DbError {
    fn from(err: lancedb::Error) -> Self {
        DbError::LanceDb(err.to_string())
    }
}

impl From<arrow_schema::ArrowError> for DbError {
    fn from(err: arrow_schema::ArrowError) -> Self {
        DbError::Arrow(err.to_string())
    }
}
