//! Shared BERT loading and tokenization.

use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_transformers::models::bert::{Config, HiddenAct, PositionEmbeddingType};
use hf_hub::api::sync::Api;
use hf_hub::{Repo, RepoType};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::{EmbedError, Result};

/// Files making up a BERT checkpoint.
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: PathBuf,
}

impl ModelFiles {
    /// Resolve files from a local directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let files = Self {
            config: dir.join("config.json"),
            tokenizer: dir.join("tokenizer.json"),
            weights: dir.join("model.safetensors"),
        };
        for path in [&files.config, &files.tokenizer, &files.weights] {
            if !path.exists() {
                return Err(EmbedError::ModelLoad(format!("missing {}", path.display())));
            }
        }
        Ok(files)
    }

    /// Resolve files from a local directory if `model_id` names one,
    /// otherwise download them from the Hugging Face Hub. Blocking.
    pub fn resolve(model_id: &str) -> Result<Self> {
        if Path::new(model_id).is_dir() {
            return Self::from_dir(model_id);
        }

        info!(model_id, "Fetching model from Hugging Face Hub");
        let api = Api::new()?;
        let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));
        Ok(Self {
            config: repo.get("config.json")?,
            tokenizer: repo.get("tokenizer.json")?,
            weights: repo.get("model.safetensors")?,
        })
    }
}

/// Pick the compute device. Falls back to CPU when no accelerator
/// backend is compiled in or the requested ordinal is unavailable.
pub fn select_device(use_gpu: bool, ordinal: usize) -> Device {
    if !use_gpu {
        return Device::Cpu;
    }

    #[cfg(feature = "cuda")]
    {
        match Device::new_cuda(ordinal) {
            Ok(device) => return device,
            Err(e) => debug!(ordinal, "CUDA not available: {}", e),
        }
    }

    #[cfg(feature = "metal")]
    {
        match Device::new_metal(ordinal) {
            Ok(device) => return device,
            Err(e) => debug!(ordinal, "Metal not available: {}", e),
        }
    }

    debug!(ordinal, "No accelerator backend, using CPU");
    Device::Cpu
}

fn usize_field(json: &serde_json::Value, key: &str, default: usize) -> usize {
    json.get(key).and_then(|v| v.as_u64()).map(|v| v as usize).unwrap_or(default)
}

fn f64_field(json: &serde_json::Value, key: &str, default: f64) -> f64 {
    json.get(key).and_then(|v| v.as_f64()).unwrap_or(default)
}

/// Build a candle BERT config from a Hugging Face `config.json` value.
pub fn bert_config(json: &serde_json::Value) -> Config {
    let hidden_act = match json.get("hidden_act").and_then(|v| v.as_str()) {
        Some("relu") => HiddenAct::Relu,
        Some("gelu_new") | Some("gelu_approximate") => HiddenAct::GeluApproximate,
        _ => HiddenAct::Gelu,
    };

    Config {
        vocab_size: usize_field(json, "vocab_size", 30522),
        hidden_size: usize_field(json, "hidden_size", 768),
        num_hidden_layers: usize_field(json, "num_hidden_layers", 12),
        num_attention_heads: usize_field(json, "num_attention_heads", 12),
        intermediate_size: usize_field(json, "intermediate_size", 3072),
        hidden_act,
        hidden_dropout_prob: f64_field(json, "hidden_dropout_prob", 0.1),
        max_position_embeddings: usize_field(json, "max_position_embeddings", 512),
        type_vocab_size: usize_field(json, "type_vocab_size", 2),
        initializer_range: f64_field(json, "initializer_range", 0.02),
        layer_norm_eps: f64_field(json, "layer_norm_eps", 1e-12),
        pad_token_id: usize_field(json, "pad_token_id", 0),
        position_embedding_type: PositionEmbeddingType::Absolute,
        use_cache: true,
        classifier_dropout: None,
        model_type: None,
    }
}

pub fn read_json(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

pub fn load_tokenizer(path: &Path) -> Result<Tokenizer> {
    Tokenizer::from_file(path).map_err(|e| EmbedError::Tokenizer(e.to_string()))
}

/// Padded model inputs for one batch.
pub struct EncodedBatch {
    pub input_ids: Tensor,
    pub token_type_ids: Tensor,
    /// f32 so pooling can multiply with it directly
    pub attention_mask: Tensor,
}

/// Tokenize, truncate to `max_length` and right-pad `texts`.
pub fn encode_batch(
    tokenizer: &Tokenizer,
    texts: &[&str],
    max_length: usize,
    device: &Device,
) -> Result<EncodedBatch> {
    if texts.is_empty() {
        return Err(EmbedError::EmptyBatch);
    }

    let encodings = tokenizer.encode_batch(texts.to_vec(), true)?;
    let limit = max_length.clamp(1, 512);
    let width = encodings
        .iter()
        .map(|e| e.get_ids().len().min(limit))
        .max()
        .unwrap_or(0)
        .max(1);

    let rows = encodings.len();
    let mut ids = vec![0u32; rows * width];
    let mut types = vec![0u32; rows * width];
    let mut mask = vec![0u32; rows * width];
    for (row, encoding) in encodings.iter().enumerate() {
        let len = encoding.get_ids().len().min(width);
        let base = row * width;
        ids[base..base + len].copy_from_slice(&encoding.get_ids()[..len]);
        types[base..base + len].copy_from_slice(&encoding.get_type_ids()[..len]);
        mask[base..base + len].copy_from_slice(&encoding.get_attention_mask()[..len]);
    }

    Ok(EncodedBatch {
        input_ids: Tensor::from_vec(ids, (rows, width), device)?,
        token_type_ids: Tensor::from_vec(types, (rows, width), device)?,
        attention_mask: Tensor::from_vec(mask, (rows, width), device)?.to_dtype(DType::F32)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bert_config_defaults_and_overrides() {
        let json = serde_json::json!({
            "hidden_size": 384,
            "num_hidden_layers": 6,
            "hidden_act": "gelu_new"
        });
        let config = bert_config(&json);
        assert_eq!(config.hidden_size, 384);
        assert_eq!(config.num_hidden_layers, 6);
        assert_eq!(config.vocab_size, 30522);
        assert!(matches!(config.hidden_act, HiddenAct::GeluApproximate));
    }

    #[test]
    fn test_model_files_from_dir_requires_all_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{}").unwrap();
        assert!(ModelFiles::from_dir(dir.path()).is_err());
        std::fs::write(dir.path().join("tokenizer.json"), "{}").unwrap();
        std::fs::write(dir.path().join("model.safetensors"), "").unwrap();
        assert!(ModelFiles::from_dir(dir.path()).is_ok());
    }

    #[test]
    fn test_select_device_cpu_when_disabled() {
        assert!(matches!(select_device(false, 3), Device::Cpu));
    }
}
