//! Mean-pooled BERT section embeddings.

use std::sync::OnceLock;

use paperlens_db::SectionMap;
use paperlens_embed::{BertEmbedder, EmbedderConfig};
use tracing::info;

use crate::error::{AnnotateError, Result};
use crate::method::{
    weighted_mean, ComputedSections, EmbeddingMethod, ExecutionBackend, SectionVector, WorkerSlot,
};

pub const NAME: &str = "bert-mean";

/// Embeds every non-blank section with a sentence-transformer checkpoint.
///
/// On a GPU build the method asks for an affinity pool with one worker per
/// device, each loading its own copy of the weights. On CPU it runs
/// sequentially; the model already uses every core.
pub struct BertMeanMethod {
    config: EmbedderConfig,
    devices: usize,
    embedder: OnceLock<BertEmbedder>,
}

impl BertMeanMethod {
    pub fn new(config: EmbedderConfig, devices: usize) -> Self {
        Self {
            config,
            devices: devices.max(1),
            embedder: OnceLock::new(),
        }
    }

    fn embedder(&self) -> Result<&BertEmbedder> {
        self.embedder
            .get()
            .ok_or_else(|| AnnotateError::Worker(format!("{} used before initialize", NAME)))
    }
}

impl EmbeddingMethod for BertMeanMethod {
    fn initialize(&self) -> Result<()> {
        if self.embedder.get().is_none() {
            let embedder = BertEmbedder::load(self.config.clone())?;
            info!(model = %embedder.model_name(), gpu = embedder.is_gpu(), "bert-mean ready");
            // A concurrent initializer may have won; either copy is equivalent.
            let _ = self.embedder.set(embedder);
        }
        Ok(())
    }

    fn compute_per_document_vectors(&self, sections: &SectionMap) -> Result<ComputedSections> {
        let embedder = self.embedder()?;

        let (titles, texts): (Vec<String>, Vec<String>) = sections
            .iter()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(title, text)| (title.to_string(), text.to_string()))
            .unzip();
        let vectors = embedder.embed_blocking(&texts)?;

        let mut out: ComputedSections =
            sections.iter().map(|(title, _)| (title.to_string(), None)).collect();
        for ((title, text), vector) in titles.into_iter().zip(&texts).zip(vectors) {
            let num_elements = text.split_whitespace().count();
            out.insert(title, Some(SectionVector { vector, num_elements }));
        }
        Ok(out)
    }

    fn aggregate_document_vector(&self, sections: &ComputedSections) -> Option<Vec<f32>> {
        weighted_mean(sections)
    }

    fn declared_worker_count(&self) -> Option<usize> {
        Some(if self.config.use_gpu { self.devices } else { 1 })
    }

    fn declared_backend(&self) -> Option<ExecutionBackend> {
        Some(if self.config.use_gpu {
            ExecutionBackend::Accelerator
        } else {
            ExecutionBackend::Sequential
        })
    }

    fn isolated_instance(&self, slot: WorkerSlot) -> Result<Box<dyn EmbeddingMethod>> {
        let config = self.config.clone().with_device(slot.device.unwrap_or(0));
        Ok(Box::new(Self::new(config, self.devices)))
    }
}
