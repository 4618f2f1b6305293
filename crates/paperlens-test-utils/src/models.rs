//! Deterministic stand-ins for the embedding model and section classifier.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use paperlens_embed::{EmbedError, LabelScores, Result, TextClassifier, TextEmbedder};
use sha2::{Digest, Sha256};

// ── Embedder ───────────────────────────────────────────────────────────────

/// Embeds each text to a fixed pseudo-random unit vector derived from its
/// SHA-256 digest, so equal texts get identical vectors and unrelated texts
/// are nearly orthogonal. Specific texts can be pinned with [`MockEmbedder::with`].
pub struct MockEmbedder {
    dimension: usize,
    pinned: HashMap<String, Vec<f32>>,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension, pinned: HashMap::new() }
    }

    pub fn with(mut self, text: &str, vector: Vec<f32>) -> Self {
        self.pinned.insert(text.to_string(), vector);
        self
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(v) = self.pinned.get(text) {
            return v.clone();
        }
        let mut out = Vec::with_capacity(self.dimension);
        let mut counter = 0u32;
        while out.len() < self.dimension {
            let digest = Sha256::new()
                .chain_update(text.as_bytes())
                .chain_update(counter.to_le_bytes())
                .finalize();
            for byte in digest.iter() {
                if out.len() == self.dimension {
                    break;
                }
                out.push(*byte as f32 / 127.5 - 1.0);
            }
            counter += 1;
        }
        let norm = out.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-9);
        out.iter().map(|x| x / norm).collect()
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl TextEmbedder for MockEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ── Classifier ─────────────────────────────────────────────────────────────

/// Returns a uniform distribution unless the input contains one of the
/// configured cues, in which case the cue's label gets `score` and the rest
/// share the remainder. Every input is recorded.
pub struct MockClassifier {
    labels: Vec<String>,
    cues: Vec<(String, String, f32)>,
    inputs: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl MockClassifier {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            labels: labels.iter().map(|l| l.to_string()).collect(),
            cues: Vec::new(),
            inputs: Mutex::new(Vec::new()),
            fail: AtomicBool::new(false),
        }
    }

    pub fn with(mut self, cue: &str, label: &str, score: f32) -> Self {
        self.cues.push((cue.to_string(), label.to_string(), score));
        self
    }

    /// Make every later prediction fail.
    pub fn failing(self) -> Self {
        self.fail.store(true, Ordering::SeqCst);
        self
    }

    /// Texts seen so far, in call order.
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl TextClassifier for MockClassifier {
    async fn predict(&self, text: &str) -> Result<LabelScores> {
        self.inputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(text.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(EmbedError::Inference("mock classifier failure".to_string()));
        }

        let n = self.labels.len().max(1) as f32;
        let hit = self.cues.iter().find(|(cue, _, _)| text.contains(cue.as_str()));
        Ok(match hit {
            Some((_, winner, score)) => {
                let rest = (1.0 - score) / (n - 1.0).max(1.0);
                self.labels
                    .iter()
                    .map(|l| (l.clone(), if l == winner { *score } else { rest }))
                    .collect()
            }
            None => self.labels.iter().map(|l| (l.clone(), 1.0 / n)).collect(),
        })
    }

    fn labels(&self) -> Vec<String> {
        self.labels.clone()
    }
}
