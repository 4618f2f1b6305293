//! BERT sentence embedder using Candle.

use std::time::Instant;

use async_trait::async_trait;
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::BertModel;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::model::{bert_config, encode_batch, load_tokenizer, read_json, select_device, ModelFiles};
use crate::pooling::l2_normalize;
use crate::{EmbedderConfig, Result, TextEmbedder};

/// Sentence embedder over a BERT checkpoint.
///
/// Inference is synchronous; the async [`TextEmbedder`] impl runs it on
/// the calling task, and worker pools call [`BertEmbedder::embed_blocking`]
/// directly from their own threads.
pub struct BertEmbedder {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
    config: EmbedderConfig,
}

impl BertEmbedder {
    /// Load without blocking the runtime.
    pub async fn new(config: EmbedderConfig) -> Result<Self> {
        tokio::task::spawn_blocking(move || Self::load(config))
            .await
            .map_err(|e| crate::EmbedError::ModelLoad(e.to_string()))?
    }

    /// Load on the current thread. Downloads the checkpoint on first use.
    pub fn load(config: EmbedderConfig) -> Result<Self> {
        let start = Instant::now();
        info!(
            model_id = %config.model_id,
            device = config.device_ordinal,
            "Loading embedding model"
        );

        let device = select_device(config.use_gpu, config.device_ordinal);
        let files = ModelFiles::resolve(&config.model_id)?;
        let bert = bert_config(&read_json(&files.config)?);
        let tokenizer = load_tokenizer(&files.tokenizer)?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, &device)?
        };
        let model = BertModel::load(vb, &bert)?;
        info!("Embedding model loaded in {:.2}s", start.elapsed().as_secs_f32());

        Ok(Self {
            model,
            tokenizer,
            device,
            dimension: bert.hidden_size,
            config,
        })
    }

    /// Embed `texts` in batches of `batch_size`. Output order matches input.
    pub fn embed_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size.max(1)) {
            let refs: Vec<&str> = chunk.iter().map(String::as_str).collect();
            out.extend(self.forward(&refs)?);
        }

        debug!(
            texts = texts.len(),
            "Embedded in {:.2}ms",
            start.elapsed().as_secs_f32() * 1000.0
        );
        Ok(out)
    }

    fn forward(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let batch = encode_batch(&self.tokenizer, texts, self.config.max_length, &self.device)?;
        let hidden = self
            .model
            .forward(&batch.input_ids, &batch.token_type_ids, Some(&batch.attention_mask))?;

        let pooled = self.config.pooling.apply(&hidden, &batch.attention_mask)?;
        let pooled = if self.config.normalize { l2_normalize(&pooled)? } else { pooled };
        Ok(pooled.to_vec2::<f32>()?)
    }

    pub fn model_name(&self) -> &str {
        &self.config.model_id
    }

    pub fn is_gpu(&self) -> bool {
        !matches!(self.device, Device::Cpu)
    }
}

#[async_trait]
impl TextEmbedder for BertEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.embed_blocking(texts)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
