//! Hashed bag-of-words vectors.
//!
//! Tokens are lower-cased alphanumeric runs, bucketed by SHA-256 into a
//! fixed number of signed dimensions and L2-normalized. No model, so
//! workers are cheap to isolate.

use std::sync::OnceLock;

use paperlens_db::SectionMap;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::method::{
    weighted_mean, ComputedSections, EmbeddingMethod, ExecutionBackend, SectionVector, WorkerSlot,
};

pub const NAME: &str = "hashed-bow";
pub const DEFAULT_DIMENSION: usize = 256;

fn token_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+").expect("token regex"))
}

pub fn tokenize(text: &str) -> Vec<String> {
    token_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .collect()
}

#[derive(Debug, Clone)]
pub struct HashedBowMethod {
    dimension: usize,
    workers: Option<usize>,
}

impl HashedBowMethod {
    pub fn new(dimension: usize) -> Self {
        Self { dimension: dimension.max(1), workers: None }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Vector for one text, `None` when it has no tokens.
    pub fn embed_text(&self, text: &str) -> Option<SectionVector> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return None;
        }

        let mut vector = vec![0f32; self.dimension];
        for token in &tokens {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let idx = (u64::from_le_bytes(bucket) % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[idx] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Some(SectionVector { vector, num_elements: tokens.len() })
    }
}

impl Default for HashedBowMethod {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

impl EmbeddingMethod for HashedBowMethod {
    fn compute_per_document_vectors(&self, sections: &SectionMap) -> Result<ComputedSections> {
        Ok(sections
            .iter()
            .map(|(title, text)| (title.to_string(), self.embed_text(text)))
            .collect())
    }

    fn aggregate_document_vector(&self, sections: &ComputedSections) -> Option<Vec<f32>> {
        weighted_mean(sections)
    }

    fn declared_worker_count(&self) -> Option<usize> {
        self.workers
    }

    fn declared_backend(&self) -> Option<ExecutionBackend> {
        Some(ExecutionBackend::CpuProcess)
    }

    fn isolated_instance(&self, _slot: WorkerSlot) -> Result<Box<dyn EmbeddingMethod>> {
        Ok(Box::new(self.clone()))
    }
}
