//! Embedding computation dispatcher.
//!
//! Pulls documents still lacking vectors for a method, fans the work out
//! through the execution strategy the method asks for, and persists each
//! document's vectors in its own transaction as results stream back.
//! Per-document failures are logged and reported, never fatal to the run.

use std::collections::HashMap;
use std::sync::Arc;

use futures::TryStreamExt;
use paperlens_config::Config;
use paperlens_db::{Document, DocumentRepository, Filter, Projection, SourceField};
use rayon::prelude::*;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::cache::ResultCache;
use crate::error::{AnnotateError, Result};
use crate::method::{decode_sections, encode_sections, EmbeddingMethod};
use crate::registry::MethodRegistry;
use crate::strategy::{select_strategy, WorkItem};

pub const STATS_CACHE_KEY: &str = "corpus_stats";

pub fn embeddings_cache_key(method: &str) -> String {
    format!("doc_embeddings:{}", method)
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    /// Worker count for methods that declare none.
    pub workers: usize,
    pub read_workers: usize,
    pub progress_interval: usize,
    /// Accelerator devices shared out by affinity pools.
    pub devices: usize,
}

impl From<&Config> for DispatchSettings {
    fn from(config: &Config) -> Self {
        Self {
            workers: config.dispatch.workers,
            read_workers: config.dispatch.read_workers,
            progress_interval: config.dispatch.progress_interval,
            devices: config.embedding.devices,
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedDocument {
    pub hash_id: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchReport {
    pub method: String,
    pub strategy: String,
    pub total: usize,
    pub written: usize,
    /// Computed but not written because vectors were already stored.
    pub unchanged: usize,
    pub failed: Vec<FailedDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchProgress {
    pub method: String,
    pub processed: usize,
    pub total: usize,
}

/// A document-level vector, `None` when nothing is stored for the method.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentVector {
    pub hash_id: String,
    pub vector: Option<Vec<f32>>,
}

pub struct Dispatcher {
    registry: Arc<MethodRegistry>,
    documents: DocumentRepository,
    cache: Arc<ResultCache>,
    settings: DispatchSettings,
    progress: Option<broadcast::Sender<DispatchProgress>>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<MethodRegistry>,
        documents: DocumentRepository,
        cache: Arc<ResultCache>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            registry,
            documents,
            cache,
            settings,
            progress: None,
        }
    }

    pub fn with_progress(mut self, sender: broadcast::Sender<DispatchProgress>) -> Self {
        self.progress = Some(sender);
        self
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Compute and store vectors for every document lacking them, or for
    /// every document when `force` is set.
    ///
    /// Fails only when the method cannot be resolved, the candidate read
    /// fails, or the worker pool dies; documents whose computation or
    /// write fails are listed in [`DispatchReport::failed`] and can be
    /// retried by running again without `force`.
    #[instrument(skip(self, source), fields(source = %source.as_str()))]
    pub async fn compute_vectors(
        &self,
        method: &str,
        source: SourceField,
        force: bool,
    ) -> Result<DispatchReport> {
        let module = self.resolve(method).await?;

        let filter = if force { Filter::all() } else { Filter::missing_embedding(method) };
        let projection = Projection::new().with_source(source).with_embedding(method);
        let docs: Vec<Document> =
            self.documents.find(&filter, &projection).await?.try_collect().await?;

        let mut already_stored = HashMap::with_capacity(docs.len());
        let items: Vec<WorkItem> = docs
            .into_iter()
            .map(|doc| {
                already_stored.insert(doc.hash_id.clone(), doc.has_embedding(method));
                let sections = doc.body(source).map(|b| b.sections.clone()).unwrap_or_default();
                WorkItem { hash_id: doc.hash_id, sections }
            })
            .collect();

        let strategy =
            select_strategy(module.as_ref(), self.settings.workers, self.settings.devices);
        let mut report = DispatchReport {
            method: method.to_string(),
            strategy: strategy.name().to_string(),
            total: items.len(),
            ..Default::default()
        };
        info!(
            method,
            strategy = strategy.name(),
            workers = strategy.workers(),
            total = report.total,
            force,
            "Computing section vectors"
        );
        if items.is_empty() {
            return Ok(report);
        }

        let (tx, mut rx) = mpsc::channel(strategy.workers().max(1) * 2);
        let worker = tokio::task::spawn_blocking(move || strategy.run(module, items, tx));

        let interval = self.settings.progress_interval.max(1);
        let mut processed = 0;
        while let Some(outcome) = rx.recv().await {
            processed += 1;
            let hash_id = outcome.hash_id;

            match outcome.result {
                Err(e) => {
                    warn!(hash_id = %hash_id, error = %e, "Skipping document, computation failed");
                    report.failed.push(FailedDocument { hash_id, error: e.to_string() });
                }
                // Re-checks the snapshot read above; a concurrent run of the
                // same method may have written since, and the later commit wins.
                Ok(_) if !force && already_stored.get(&hash_id).copied().unwrap_or(false) => {
                    report.unchanged += 1;
                }
                Ok(computed) => {
                    let stored = encode_sections(&computed);
                    match self.documents.set_section_embeddings(&hash_id, method, stored).await {
                        Ok(()) => report.written += 1,
                        Err(e) => {
                            let e = AnnotateError::from(e);
                            warn!(
                                hash_id = %hash_id,
                                error = %e,
                                "Skipping document, write failed"
                            );
                            report.failed.push(FailedDocument { hash_id, error: e.to_string() });
                        }
                    }
                }
            }

            if processed % interval == 0 || processed == report.total {
                info!(method, processed, total = report.total, "Dispatch progress");
                if let Some(sender) = &self.progress {
                    // No subscribers is fine.
                    let _ = sender.send(DispatchProgress {
                        method: method.to_string(),
                        processed,
                        total: report.total,
                    });
                }
            }
        }

        // Rows may already be written even if the pool reports an error below.
        if report.written > 0 {
            self.cache.invalidate(&embeddings_cache_key(method));
            self.cache.invalidate(STATS_CACHE_KEY);
        }

        worker
            .await
            .map_err(|e| AnnotateError::Worker(format!("dispatch worker: {}", e)))??;

        info!(
            method,
            written = report.written,
            unchanged = report.unchanged,
            failed = report.failed.len(),
            "Section vectors computed"
        );
        Ok(report)
    }

    /// Reduce one document's stored vectors for `method` to a single vector.
    pub fn read_mean_embedding(&self, method: &str, doc: &Document) -> Result<DocumentVector> {
        let module = self.registry.resolve(method)?;
        mean_embedding(module.as_ref(), method, doc)
    }

    /// Document vectors for `method`, for the given documents or all of
    /// them. Full-corpus results are memoized when `use_cache` is set.
    pub async fn list_doc_embeddings(
        &self,
        method: &str,
        hash_ids: Option<Vec<String>>,
        use_cache: bool,
    ) -> Result<Vec<DocumentVector>> {
        let cache_key = embeddings_cache_key(method);
        let cacheable = use_cache && hash_ids.is_none();
        if cacheable {
            if let Some(hit) = self.cache.get::<Arc<Vec<DocumentVector>>>(&cache_key) {
                debug!(method, "Document vectors served from cache");
                return Ok(hit.as_ref().clone());
            }
        }

        let module = self.resolve(method).await?;
        let filter = Filter::all().with_hash_ids(hash_ids);
        let docs = self.read_docs(&filter, Projection::new().with_embedding(method)).await?;

        let name = method.to_string();
        let vectors = self
            .on_read_pool(docs, move |doc| mean_embedding(module.as_ref(), &name, doc))
            .await?;

        if cacheable {
            self.cache.put(&cache_key, Arc::new(vectors.clone()));
        }
        Ok(vectors)
    }

    /// Like [`Self::list_doc_embeddings`] but aggregating only the sections
    /// titled `section`, or translated to it when `use_translation` is set.
    pub async fn list_doc_embeddings_from_section(
        &self,
        method: &str,
        section: &str,
        hash_ids: Option<Vec<String>>,
        use_translation: bool,
    ) -> Result<Vec<DocumentVector>> {
        let module = self.resolve(method).await?;
        let filter = Filter::all().with_hash_ids(hash_ids);
        let mut projection = Projection::new().with_embedding(method);
        projection.translation = use_translation;
        let docs = self.read_docs(&filter, projection).await?;

        let (name, section) = (method.to_string(), section.to_string());
        self.on_read_pool(docs, move |doc| {
            let vector = match stored_sections(&name, doc) {
                Some(stored) => {
                    let computed = decode_sections(stored)?;
                    let table =
                        if use_translation { doc.sections_translation.as_ref() } else { None };
                    module.aggregate_section_vector(&computed, &section, table)
                }
                None => None,
            };
            Ok(DocumentVector { hash_id: doc.hash_id.clone(), vector })
        })
        .await
    }

    /// Resolve off the runtime; first-use initialization may load a model.
    async fn resolve(&self, method: &str) -> Result<Arc<dyn EmbeddingMethod>> {
        let registry = self.registry.clone();
        let name = method.to_string();
        tokio::task::spawn_blocking(move || registry.resolve(&name))
            .await
            .map_err(|e| AnnotateError::Worker(format!("method initialization: {}", e)))?
    }

    async fn read_docs(&self, filter: &Filter, projection: Projection) -> Result<Vec<Document>> {
        Ok(self.documents.find(filter, &projection).await?.try_collect().await?)
    }

    /// Map documents on a bounded rayon pool off the async runtime,
    /// keeping input order.
    async fn on_read_pool<F>(&self, docs: Vec<Document>, f: F) -> Result<Vec<DocumentVector>>
    where
        F: Fn(&Document) -> Result<DocumentVector> + Send + Sync + 'static,
    {
        let workers = self.settings.read_workers.max(1);
        tokio::task::spawn_blocking(move || {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .thread_name(|i| format!("embed-read-{}", i))
                .build()
                .map_err(|e| AnnotateError::Worker(e.to_string()))?;
            pool.install(|| docs.par_iter().map(|doc| f(doc)).collect::<Result<Vec<_>>>())
        })
        .await
        .map_err(|e| AnnotateError::Worker(format!("read pool: {}", e)))?
    }
}

fn stored_sections<'a>(
    method: &str,
    doc: &'a Document,
) -> Option<&'a paperlens_db::SectionVectors> {
    doc.sections_embeddings.as_ref()?.get(method)
}

fn mean_embedding(
    module: &dyn EmbeddingMethod,
    method: &str,
    doc: &Document,
) -> Result<DocumentVector> {
    let vector = match stored_sections(method, doc) {
        Some(stored) => module.aggregate_document_vector(&decode_sections(stored)?),
        None => None,
    };
    Ok(DocumentVector { hash_id: doc.hash_id.clone(), vector })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::methods::HashedBowMethod;
    use paperlens_db::{MemoryStore, SectionVectors, StoredVector};

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(MethodRegistry::new());
        registry.register("hashed-bow", Arc::new(HashedBowMethod::new(8))).unwrap();
        let store = Arc::new(MemoryStore::new());
        Dispatcher::new(
            registry,
            DocumentRepository::new(store),
            Arc::new(ResultCache::new()),
            DispatchSettings::default(),
        )
    }

    #[test]
    fn test_read_mean_embedding_without_vectors() {
        let dispatcher = dispatcher();
        let doc = Document::new("a");
        let out = dispatcher.read_mean_embedding("hashed-bow", &doc).unwrap();
        assert_eq!(out, DocumentVector { hash_id: "a".to_string(), vector: None });
    }

    #[test]
    fn test_read_mean_embedding_weights_sections() {
        let dispatcher = dispatcher();
        let mut stored = SectionVectors::new();
        stored.insert("Abstract".to_string(), Some(StoredVector::encode(&[1.0, 0.0], 3)));
        stored.insert("Methods".to_string(), Some(StoredVector::encode(&[0.0, 1.0], 1)));
        stored.insert("Empty".to_string(), None);
        let mut doc = Document::new("a");
        doc.sections_embeddings = Some([("hashed-bow".to_string(), stored)].into_iter().collect());

        let out = dispatcher.read_mean_embedding("hashed-bow", &doc).unwrap();
        assert_eq!(out.vector, Some(vec![0.75, 0.25]));
    }

    #[test]
    fn test_corrupt_vector_is_serialization_error() {
        let dispatcher = dispatcher();
        let mut stored = SectionVectors::new();
        stored.insert(
            "Abstract".to_string(),
            Some(StoredVector { vector: "bm90IGEgdmVjdG9y".to_string(), num_elements: 1 }),
        );
        let mut doc = Document::new("a");
        doc.sections_embeddings = Some([("hashed-bow".to_string(), stored)].into_iter().collect());

        assert!(matches!(
            dispatcher.read_mean_embedding("hashed-bow", &doc),
            Err(AnnotateError::Serialization(_))
        ));
    }

    #[test]
    fn test_unknown_method_is_fatal() {
        let dispatcher = dispatcher();
        assert!(matches!(
            dispatcher.read_mean_embedding("nope", &Document::new("a")),
            Err(AnnotateError::UnknownMethod(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_empty_corpus_reports_nothing() {
        let report = dispatcher()
            .compute_vectors("hashed-bow", SourceField::Raw, false)
            .await
            .unwrap();
        assert_eq!(report.total, 0);
        assert_eq!(report.strategy, "process-pool");
        assert!(report.failed.is_empty());
    }
}
