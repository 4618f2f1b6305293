//! Configuration for the BERT embedder.

use serde::{Deserialize, Serialize};

use crate::PoolingStrategy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    /// Hugging Face model ID, or a local directory holding
    /// `config.json`, `tokenizer.json` and `model.safetensors`.
    pub model_id: String,

    /// Maximum sequence length in tokens (capped at 512)
    pub max_length: usize,

    /// Texts per forward pass
    pub batch_size: usize,

    /// L2-normalize embeddings
    pub normalize: bool,

    pub pooling: PoolingStrategy,

    /// Use an accelerator if one was compiled in
    pub use_gpu: bool,

    /// Accelerator ordinal; affinity pools pin one worker per device
    pub device_ordinal: usize,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model_id: "sentence-transformers/all-MiniLM-L6-v2".to_string(),
            max_length: 512,
            batch_size: 32,
            normalize: true,
            pooling: PoolingStrategy::Mean,
            use_gpu: false,
            device_ordinal: 0,
        }
    }
}

impl EmbedderConfig {
    /// Create config for CPU-only inference.
    pub fn cpu() -> Self {
        Self::default()
    }

    /// Create config pinned to accelerator `ordinal`.
    pub fn gpu(ordinal: usize) -> Self {
        Self {
            use_gpu: true,
            device_ordinal: ordinal,
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_max_length(mut self, length: usize) -> Self {
        self.max_length = length;
        self
    }

    pub fn with_device(mut self, ordinal: usize) -> Self {
        self.device_ordinal = ordinal;
        self
    }
}
