//! Process-wide annotation state.
//!
//! One [`AnnotationContext`] owns the method registry, the result cache and
//! the document repository, so every dispatcher and engine built from it
//! shares the same module instances and cached results.

use std::sync::Arc;
use std::time::Duration;

use paperlens_config::Config;
use paperlens_db::{CorpusStats, Database, DocumentRepository, DocumentStore};
use paperlens_embed::{BertEmbedder, BertSectionClassifier, EmbedderConfig};
use tracing::{debug, info};

use crate::cache::{Clock, ResultCache, SystemClock};
use crate::dispatcher::{DispatchSettings, Dispatcher, STATS_CACHE_KEY};
use crate::error::{AnnotateError, Result};
use crate::methods::{bert, hashing, BertMeanMethod, HashedBowMethod};
use crate::registry::MethodRegistry;
use crate::sections::{SectionClassificationEngine, SectionReference};

pub struct AnnotationContext {
    config: Config,
    registry: Arc<MethodRegistry>,
    cache: Arc<ResultCache>,
    documents: DocumentRepository,
}

impl AnnotationContext {
    pub fn new(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: Arc<dyn DocumentStore>,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let ttl = Duration::from_secs(config.cache.ttl_hours.saturating_mul(3600));
        Self {
            registry: Arc::new(MethodRegistry::new()),
            cache: Arc::new(ResultCache::with_clock(clock, ttl)),
            documents: DocumentRepository::new(store),
            config,
        }
    }

    /// Open the configured LanceDB store, creating the table if needed.
    pub async fn open(config: Config) -> Result<Self> {
        let db = Database::open_with_table(&config.store.path, &config.store.table).await?;
        db.initialize().await?;
        info!(path = %config.store.path, table = %config.store.table, "Document store ready");
        Ok(Self::new(Arc::new(db), config))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    pub fn documents(&self) -> &DocumentRepository {
        &self.documents
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.registry.clone(),
            self.documents.clone(),
            self.cache.clone(),
            DispatchSettings::from(&self.config),
        )
    }

    fn embedder_config(&self) -> EmbedderConfig {
        let embedding = &self.config.embedding;
        let base = if embedding.use_gpu { EmbedderConfig::gpu(0) } else { EmbedderConfig::cpu() };
        base.with_model(embedding.model_id.clone())
            .with_max_length(embedding.max_length)
            .with_batch_size(embedding.batch_size)
    }

    /// Register `hashed-bow` and `bert-mean`. Neither loads anything until
    /// first resolved.
    pub fn register_builtin_methods(&self) -> Result<()> {
        self.registry
            .register(hashing::NAME, Arc::new(HashedBowMethod::default()))?;
        self.registry.register(
            bert::NAME,
            Arc::new(BertMeanMethod::new(self.embedder_config(), self.config.embedding.devices)),
        )?;
        Ok(())
    }

    /// Load the embedding model, the fallback classifier and the label
    /// reference named in the config, and prepare an engine over them.
    pub async fn classification_engine(&self) -> Result<SectionClassificationEngine> {
        let classifier = &self.config.classifier;
        let model_path = classifier
            .model_path
            .clone()
            .ok_or_else(|| AnnotateError::Config("classifier.model_path is not set".to_string()))?;

        let reference = match &classifier.reference_path {
            Some(path) => SectionReference::from_path(path)?,
            None => SectionReference::default(),
        };

        let embedder = BertEmbedder::new(self.embedder_config()).await?;
        let use_gpu = self.config.embedding.use_gpu;
        let fallback =
            tokio::task::spawn_blocking(move || BertSectionClassifier::load(model_path, use_gpu))
                .await
                .map_err(|e| AnnotateError::Worker(format!("classifier load: {}", e)))??;

        SectionClassificationEngine::prepare(
            reference,
            Arc::new(embedder),
            Arc::new(fallback),
            classifier.acceptance_threshold,
        )
        .await
    }

    /// Corpus counts, memoized for the cache TTL and dropped whenever a
    /// dispatch writes new vectors.
    pub async fn stats(&self) -> Result<CorpusStats> {
        if let Some(stats) = self.cache.get::<CorpusStats>(STATS_CACHE_KEY) {
            debug!("Corpus stats served from cache");
            return Ok(stats);
        }
        let stats = self.documents.stats().await?;
        self.cache.put(STATS_CACHE_KEY, stats.clone());
        Ok(stats)
    }
}
