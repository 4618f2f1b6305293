//! Fine-tuned BERT sequence classifier for section text.
//!
//! Loads a `BertForSequenceClassification` export from a directory:
//! `config.json` (with `id2label`), `tokenizer.json` and
//! `model.safetensors`. Scores are softmax probabilities over every label.

use std::path::Path;

use async_trait::async_trait;
use candle_core::{DType, Device, Module};
use candle_nn::{linear, Linear, VarBuilder};
use candle_transformers::models::bert::BertModel;
use tokenizers::Tokenizer;
use tracing::info;

use crate::model::{bert_config, encode_batch, load_tokenizer, read_json, select_device, ModelFiles};
use crate::pooling::PoolingStrategy;
use crate::{EmbedError, LabelScores, Result, TextClassifier};

pub struct BertSectionClassifier {
    bert: BertModel,
    pooler: Linear,
    head: Linear,
    tokenizer: Tokenizer,
    labels: Vec<String>,
    device: Device,
    max_length: usize,
}

/// Read `id2label` into a dense, id-ordered label list.
fn parse_labels(json: &serde_json::Value) -> Result<Vec<String>> {
    let map = json
        .get("id2label")
        .and_then(|v| v.as_object())
        .ok_or_else(|| EmbedError::LabelMap("config.json has no id2label".to_string()))?;

    let mut labels = vec![None; map.len()];
    for (id, label) in map {
        let idx: usize = id
            .parse()
            .map_err(|_| EmbedError::LabelMap(format!("non-numeric label id {}", id)))?;
        let name = label
            .as_str()
            .ok_or_else(|| EmbedError::LabelMap(format!("label {} is not a string", id)))?;
        let slot = labels
            .get_mut(idx)
            .ok_or_else(|| EmbedError::LabelMap(format!("label id {} out of range", idx)))?;
        *slot = Some(name.to_string());
    }
    labels
        .into_iter()
        .enumerate()
        .map(|(i, l)| l.ok_or_else(|| EmbedError::LabelMap(format!("missing label id {}", i))))
        .collect()
}

impl BertSectionClassifier {
    pub fn load(dir: impl AsRef<Path>, use_gpu: bool) -> Result<Self> {
        let files = ModelFiles::from_dir(dir.as_ref())?;
        let json = read_json(&files.config)?;
        let labels = parse_labels(&json)?;
        let config = bert_config(&json);
        let device = select_device(use_gpu, 0);

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, &device)?
        };
        let bert = BertModel::load(vb.pp("bert"), &config)?;
        let pooler = linear(config.hidden_size, config.hidden_size, vb.pp("bert.pooler.dense"))?;
        let head = linear(config.hidden_size, labels.len(), vb.pp("classifier"))?;
        info!(path = %dir.as_ref().display(), labels = labels.len(), "Loaded section classifier");

        Ok(Self {
            bert,
            pooler,
            head,
            tokenizer: load_tokenizer(&files.tokenizer)?,
            labels,
            device,
            max_length: config.max_position_embeddings,
        })
    }

    pub fn predict_blocking(&self, text: &str) -> Result<LabelScores> {
        let batch = encode_batch(&self.tokenizer, &[text], self.max_length, &self.device)?;
        let hidden = self
            .bert
            .forward(&batch.input_ids, &batch.token_type_ids, Some(&batch.attention_mask))?;
        let cls = PoolingStrategy::Cls.apply(&hidden, &batch.attention_mask)?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits = self.head.forward(&pooled)?;
        let probs = candle_nn::ops::softmax_last_dim(&logits)?.squeeze(0)?.to_vec1::<f32>()?;

        Ok(self.labels.iter().cloned().zip(probs).collect())
    }
}

#[async_trait]
impl TextClassifier for BertSectionClassifier {
    async fn predict(&self, text: &str) -> Result<LabelScores> {
        self.predict_blocking(text)
    }

    fn labels(&self) -> Vec<String> {
        self.labels.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_labels_orders_by_id() {
        let json = serde_json::json!({
            "id2label": {"1": "methods", "0": "abstract", "2": "results"}
        });
        assert_eq!(parse_labels(&json).unwrap(), vec!["abstract", "methods", "results"]);
    }

    #[test]
    fn test_parse_labels_rejects_gaps() {
        let json = serde_json::json!({"id2label": {"0": "abstract", "2": "results"}});
        assert!(parse_labels(&json).is_err());
        assert!(parse_labels(&serde_json::json!({})).is_err());
    }
}
