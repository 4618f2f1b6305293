//! paperlens Model Collaborators
//!
//! Pure Rust BERT inference using Candle (Hugging Face): a sentence
//! embedder for section titles and text, and a fine-tuned sequence
//! classifier used as the text fallback when classifying sections.
//!
//! Both sit behind small traits so the annotation core can run against
//! deterministic fakes in tests.
//!
//! # Example
//! ```rust,no_run
//! use paperlens_embed::{BertEmbedder, EmbedderConfig, TextEmbedder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let embedder = BertEmbedder::new(EmbedderConfig::default()).await?;
//!     let vectors = embedder.embed(&["Materials and methods".to_string()]).await?;
//!     println!("dimension: {}", vectors[0].len());
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;

pub mod classifier;
pub mod config;
pub mod embedder;
pub mod error;
pub mod model;
pub mod pooling;

pub use classifier::BertSectionClassifier;
pub use config::EmbedderConfig;
pub use embedder::BertEmbedder;
pub use error::{EmbedError, Result};
pub use pooling::PoolingStrategy;

/// `(label, probability)` pairs produced by a classifier.
pub type LabelScores = Vec<(String, f32)>;

/// Text in, fixed-length vector out.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> usize;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or(EmbedError::CountMismatch { expected: 1, actual: 0 })
    }
}

/// Text in, probability distribution over labels out.
#[async_trait]
pub trait TextClassifier: Send + Sync {
    async fn predict(&self, text: &str) -> Result<LabelScores>;

    fn labels(&self) -> Vec<String>;
}
