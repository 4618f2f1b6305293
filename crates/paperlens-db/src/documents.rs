//! Document repository.
//!
//! Higher-level reads and writes over any [`DocumentStore`]. Every write is
//! a single transaction; per-document writes from the annotation core touch
//! exactly one document.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::TryStreamExt;
use tracing::debug;

use crate::error::Result;
use crate::schema::{
    validate_field_key, Document, DocumentBody, RawDocument, SectionMap, SectionVectors,
    SourceField, TranslationTable,
};
use crate::store::{
    DocumentField, DocumentStore, DocumentStream, EmbeddingProjection, FieldUpdate, Filter,
    Projection, WriteOp,
};

/// Corpus-level counts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CorpusStats {
    pub documents: u64,
    pub translated: u64,
    /// Documents with stored vectors, per algorithm.
    pub embeddings: BTreeMap<String, u64>,
}

/// Repository for document operations.
#[derive(Clone)]
pub struct DocumentRepository {
    store: Arc<dyn DocumentStore>,
}

impl DocumentRepository {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.store.clone()
    }

    // ── Insertion ────────────────────────────────────────────────────────────

    pub async fn exists(&self, hash_id: &str) -> Result<bool> {
        self.store.exists(hash_id).await
    }

    pub async fn insert_raw_document(&self, raw: RawDocument) -> Result<()> {
        self.store
            .transaction(vec![WriteOp::InsertOne(Document::from_raw(raw))])
            .await
    }

    /// Insert many papers in one transaction.
    pub async fn insert_raw_documents(&self, raws: Vec<RawDocument>) -> Result<()> {
        if raws.is_empty() {
            return Ok(());
        }
        let ops = raws
            .into_iter()
            .map(|raw| WriteOp::InsertOne(Document::from_raw(raw)))
            .collect();
        self.store.transaction(ops).await
    }

    // ── Update ───────────────────────────────────────────────────────────────

    pub async fn update_raw_documents(&self, bodies: Vec<(String, DocumentBody)>) -> Result<()> {
        self.update_bodies(SourceField::Raw, bodies).await
    }

    pub async fn update_clean_documents(&self, bodies: Vec<(String, DocumentBody)>) -> Result<()> {
        self.update_bodies(SourceField::Clean, bodies).await
    }

    async fn update_bodies(
        &self,
        source: SourceField,
        bodies: Vec<(String, DocumentBody)>,
    ) -> Result<()> {
        let ops = bodies
            .into_iter()
            .map(|(hash_id, body)| {
                WriteOp::upsert(hash_id, vec![FieldUpdate::Body { source, body }])
            })
            .collect();
        self.store.transaction(ops).await
    }

    /// Copy `fields` from each document into the store. Use with caution:
    /// the copied fields overwrite whatever is stored.
    pub async fn update_fields_documents(
        &self,
        docs: &[Document],
        fields: &[DocumentField],
    ) -> Result<()> {
        let ops = docs
            .iter()
            .map(|doc| {
                let set = fields.iter().map(|f| FieldUpdate::copy_from(doc, *f)).collect();
                WriteOp::upsert(doc.hash_id.clone(), set)
            })
            .collect();
        self.store.transaction(ops).await
    }

    /// Set `sections_embeddings.<method>` for one document.
    pub async fn set_section_embeddings(
        &self,
        hash_id: &str,
        method: &str,
        sections: SectionVectors,
    ) -> Result<()> {
        validate_field_key(method)?;
        self.store
            .transaction(vec![WriteOp::upsert(
                hash_id,
                vec![FieldUpdate::MethodEmbeddings { method: method.to_string(), sections }],
            )])
            .await
    }

    /// Replace the translation table for one document.
    pub async fn set_sections_translation(
        &self,
        hash_id: &str,
        table: TranslationTable,
    ) -> Result<()> {
        let op = WriteOp::upsert(hash_id, vec![FieldUpdate::SectionsTranslation(table)]);
        self.store.transaction(vec![op]).await
    }

    // ── Get ──────────────────────────────────────────────────────────────────

    /// Lazy projected read.
    pub async fn find(&self, filter: &Filter, projection: &Projection) -> Result<DocumentStream> {
        self.store.find(filter, projection).await
    }

    /// Projected read, optionally rewriting section keys to canonical labels.
    pub async fn list_documents(
        &self,
        filter: &Filter,
        projection: &Projection,
        use_translation: bool,
    ) -> Result<Vec<Document>> {
        let mut projection = projection.clone();
        if use_translation {
            projection.translation = true;
        }

        let docs: Vec<Document> = self.store.find(filter, &projection).await?.try_collect().await?;
        if !use_translation {
            return Ok(docs);
        }

        Ok(docs
            .into_iter()
            .map(|mut doc| {
                let table = doc.sections_translation.clone().unwrap_or_default();
                for source in [SourceField::Raw, SourceField::Clean] {
                    if let Some(body) = doc.body_mut(source).as_mut() {
                        body.sections = translate_sections(&body.sections, &table);
                    }
                }
                doc
            })
            .collect())
    }

    pub async fn list_raw_documents(
        &self,
        hash_ids: Option<Vec<String>>,
        use_translation: bool,
    ) -> Result<Vec<Document>> {
        let projection = Projection::new().with_metadata().with_source(SourceField::Raw);
        self.list_documents(&Filter::all().with_hash_ids(hash_ids), &projection, use_translation)
            .await
    }

    pub async fn list_clean_documents(
        &self,
        hash_ids: Option<Vec<String>>,
        use_translation: bool,
    ) -> Result<Vec<Document>> {
        let projection = Projection::new().with_metadata().with_source(SourceField::Clean);
        self.list_documents(&Filter::all().with_hash_ids(hash_ids), &projection, use_translation)
            .await
    }

    pub async fn list_titles(
        &self,
        hash_ids: Option<Vec<String>>,
    ) -> Result<Vec<(String, Option<String>)>> {
        let filter = Filter::all().with_hash_ids(hash_ids);
        let docs = self.list_documents(&filter, &Projection::new().with_metadata(), false).await?;
        Ok(docs.into_iter().map(|d| (d.hash_id, d.title)).collect())
    }

    /// Count documents, translated documents and per-method coverage.
    pub async fn stats(&self) -> Result<CorpusStats> {
        let projection = Projection {
            embeddings: EmbeddingProjection::All,
            translation: true,
            ..Default::default()
        };
        let mut stream = self.store.find(&Filter::all(), &projection).await?;

        let mut stats = CorpusStats::default();
        while let Some(doc) = stream.try_next().await? {
            stats.documents += 1;
            if doc.has_translation() {
                stats.translated += 1;
            }
            for method in doc.sections_embeddings.unwrap_or_default().into_keys() {
                *stats.embeddings.entry(method).or_insert(0) += 1;
            }
        }
        debug!(documents = stats.documents, "Computed corpus stats");
        Ok(stats)
    }
}

/// Rewrite section titles to canonical labels.
///
/// Sections without a table entry are dropped; sections sharing a label are
/// concatenated in document order.
pub fn translate_sections(sections: &SectionMap, table: &TranslationTable) -> SectionMap {
    let mut out = SectionMap::new();
    for (title, text) in sections.iter() {
        if let Some(entry) = table.get(title) {
            out.append(entry.label.clone(), text);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::schema::SectionTranslation;
    use crate::store::MetadataField;

    fn raw(id: &str) -> RawDocument {
        RawDocument {
            hash_id: id.to_string(),
            title: Some(format!("Paper {}", id)),
            sections: vec![("", "preamble"), ("1. Intro", "intro text"), ("Methods", "method text")]
                .into_iter()
                .collect(),
            sections_order: vec!["".to_string(), "1. Intro".to_string(), "Methods".to_string()],
            ..Default::default()
        }
    }

    fn entry(label: &str, confidence: f64) -> SectionTranslation {
        SectionTranslation { label: label.to_string(), confidence }
    }

    fn repo() -> DocumentRepository {
        DocumentRepository::new(Arc::new(MemoryStore::new()))
    }

    #[test]
    fn test_translate_sections_drops_unknown_and_merges_labels() {
        let sections: SectionMap =
            vec![("A", "one "), ("B", "two "), ("C", "three")].into_iter().collect();
        let mut table = TranslationTable::new();
        table.insert("A".to_string(), entry("results", 0.7));
        table.insert("C".to_string(), entry("results", 0.6));
        let out = translate_sections(&sections, &table);
        assert_eq!(out.len(), 1);
        assert_eq!(out.get("results"), Some("one three"));
    }

    #[tokio::test]
    async fn test_insert_and_exists() {
        let repo = repo();
        repo.insert_raw_documents(vec![raw("a"), raw("b")]).await.unwrap();
        assert!(repo.exists("a").await.unwrap());
        assert!(!repo.exists("z").await.unwrap());
        assert!(repo.insert_raw_document(raw("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_list_raw_documents_with_translation() {
        let repo = repo();
        repo.insert_raw_document(raw("a")).await.unwrap();
        let mut table = TranslationTable::new();
        table.insert("1. Intro".to_string(), entry("introduction", 0.93));
        table.insert("Methods".to_string(), entry("methods", 0.88));
        repo.set_sections_translation("a", table).await.unwrap();

        let docs = repo.list_raw_documents(None, true).await.unwrap();
        let sections = &docs[0].raw.as_ref().unwrap().sections;
        assert_eq!(sections.titles(), vec!["introduction", "methods"]);

        let untranslated =
            repo.list_raw_documents(Some(vec!["a".to_string()]), false).await.unwrap();
        assert_eq!(untranslated[0].raw.as_ref().unwrap().sections.len(), 3);
        assert!(untranslated[0].sections_translation.is_none());
    }

    #[tokio::test]
    async fn test_set_section_embeddings_rejects_reserved_names() {
        let repo = repo();
        let err = repo.set_section_embeddings("a", "bad.name", SectionVectors::new()).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_update_fields_documents_copies_selected_fields() {
        let repo = repo();
        repo.insert_raw_document(raw("a")).await.unwrap();
        let mut patch = Document::new("a");
        patch.url = Some("https://example.org/a".to_string());
        patch.title = Some("ignored".to_string());
        repo.update_fields_documents(&[patch], &[DocumentField::Metadata(MetadataField::Url)])
            .await
            .unwrap();

        let titles = repo.list_titles(None).await.unwrap();
        assert_eq!(titles, vec![("a".to_string(), Some("Paper a".to_string()))]);
        let docs = repo.list_raw_documents(None, false).await.unwrap();
        assert_eq!(docs[0].url.as_deref(), Some("https://example.org/a"));
    }

    #[tokio::test]
    async fn test_stats_counts_coverage() {
        let repo = repo();
        repo.insert_raw_documents(vec![raw("a"), raw("b")]).await.unwrap();
        repo.set_section_embeddings("a", "m1", SectionVectors::new()).await.unwrap();
        let mut table = TranslationTable::new();
        table.insert("Methods".to_string(), entry("methods", 0.9));
        repo.set_sections_translation("b", table).await.unwrap();

        let stats = repo.stats().await.unwrap();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.translated, 1);
        assert_eq!(stats.embeddings.get("m1"), Some(&1));
    }
}
