//! Failures of the title embedder and the fallback section classifier.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EmbedError>;

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("Cannot load model: {0}")]
    ModelLoad(String),

    #[error("Hub download failed: {0}")]
    Download(String),

    #[error("Tokenizer: {0}")]
    Tokenizer(String),

    #[error("Forward pass failed: {0}")]
    Inference(String),

    /// `id2label` in the classifier's config.json is missing or malformed.
    #[error("Bad label map: {0}")]
    LabelMap(String),

    #[error("Nothing to encode")]
    EmptyBatch,

    #[error("Asked for {expected} vectors, model produced {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Classifier emitted label '{0}' outside the reference set")]
    UnknownLabel(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<candle_core::Error> for EmbedError {
    fn from(e: candle_core::Error) -> Self {
        EmbedError::Inference(e.to_string())
    }
}

impl From<tokenizers::Error> for EmbedError {
    fn from(e: tokenizers::Error) -> Self {
        EmbedError::Tokenizer(e.to_string())
    }
}

impl From<hf_hub::api::sync::ApiError> for EmbedError {
    fn from(e: hf_hub::api::sync::ApiError) -> Self {
        EmbedError::Download(e.to_string())
    }
}
