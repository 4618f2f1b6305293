//! Document store contract.
//!
//! The annotation core talks to storage through [`DocumentStore`]: filtered,
//! projected reads returned as a lazy stream, and writes grouped into a
//! transaction of [`WriteOp`]s.

use std::collections::HashSet;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::Result;
use crate::schema::{
    Document, DocumentBody, SectionEmbeddings, SectionVectors, SourceField, TranslationTable,
};

/// Lazy sequence of documents returned by [`DocumentStore::find`].
pub type DocumentStream = BoxStream<'static, Result<Document>>;

// =============================================================================
// Filter
// =============================================================================

/// Which documents a read selects. The default selects every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub hash_ids: Option<Vec<String>>,
    /// Only documents lacking `sections_embeddings[<method>]`.
    pub missing_embedding: Option<String>,
    /// Only documents whose translation table is absent or empty.
    pub missing_translation: bool,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn hash_ids(ids: Vec<String>) -> Self {
        Self { hash_ids: Some(ids), ..Default::default() }
    }

    pub fn with_hash_ids(mut self, ids: Option<Vec<String>>) -> Self {
        self.hash_ids = ids;
        self
    }

    pub fn missing_embedding(method: impl Into<String>) -> Self {
        Self { missing_embedding: Some(method.into()), ..Default::default() }
    }

    pub fn missing_translation() -> Self {
        Self { missing_translation: true, ..Default::default() }
    }

    pub fn is_all(&self) -> bool {
        self == &Self::default()
    }

    /// Single-document check. Scans over many documents should use
    /// [`Filter::matcher`] so the id list is hashed once.
    pub fn matches(&self, doc: &Document) -> bool {
        self.matcher().matches(doc)
    }

    pub fn matcher(&self) -> FilterMatcher<'_> {
        FilterMatcher {
            ids: self.hash_ids.as_ref().map(|ids| ids.iter().map(String::as_str).collect()),
            filter: self,
        }
    }
}

/// A [`Filter`] prepared for repeated matching.
pub struct FilterMatcher<'a> {
    filter: &'a Filter,
    ids: Option<HashSet<&'a str>>,
}

impl FilterMatcher<'_> {
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(doc.hash_id.as_str()) {
                return false;
            }
        }
        if let Some(method) = &self.filter.missing_embedding {
            if doc.has_embedding(method) {
                return false;
            }
        }
        if self.filter.missing_translation && doc.has_translation() {
            return false;
        }
        true
    }
}

// =============================================================================
// Projection
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub enum EmbeddingProjection {
    #[default]
    None,
    Method(String),
    All,
}

/// Which fields a read transfers. `hash_id` is always included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Projection {
    pub metadata: bool,
    pub raw: bool,
    pub clean: bool,
    pub sections_order: bool,
    pub embeddings: EmbeddingProjection,
    pub translation: bool,
}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn full() -> Self {
        Self {
            metadata: true,
            raw: true,
            clean: true,
            sections_order: true,
            embeddings: EmbeddingProjection::All,
            translation: true,
        }
    }

    pub fn with_metadata(mut self) -> Self {
        self.metadata = true;
        self
    }

    pub fn with_source(mut self, source: SourceField) -> Self {
        match source {
            SourceField::Raw => self.raw = true,
            SourceField::Clean => self.clean = true,
        }
        self
    }

    pub fn with_embedding(mut self, method: impl Into<String>) -> Self {
        self.embeddings = EmbeddingProjection::Method(method.into());
        self
    }

    pub fn with_translation(mut self) -> Self {
        self.translation = true;
        self
    }

    pub fn with_sections_order(mut self) -> Self {
        self.sections_order = true;
        self
    }

    /// Drop every field this projection does not select.
    pub fn apply(&self, mut doc: Document) -> Document {
        if !self.metadata {
            doc.cord_uid = None;
            doc.doi = None;
            doc.publish_time = None;
            doc.source = None;
            doc.title = None;
            doc.url = None;
        }
        if !self.raw {
            doc.raw = None;
        }
        if !self.clean {
            doc.clean = None;
        }
        if !self.sections_order {
            doc.sections_order = None;
        }
        doc.sections_embeddings = match &self.embeddings {
            EmbeddingProjection::None => None,
            EmbeddingProjection::All => doc.sections_embeddings,
            EmbeddingProjection::Method(method) => Some(
                doc.sections_embeddings
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|(name, _)| name == method)
                    .collect(),
            ),
        };
        if !self.translation {
            doc.sections_translation = None;
        }
        doc
    }
}

// =============================================================================
// Writes
// =============================================================================

/// Scalar metadata fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataField {
    CordUid,
    Doi,
    PublishTime,
    Source,
    Title,
    Url,
}

/// Any top-level document field, used to copy fields wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentField {
    Metadata(MetadataField),
    Raw,
    Clean,
    SectionsOrder,
    SectionsEmbeddings,
    SectionsTranslation,
}

/// A partial-field `$set`.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Metadata { field: MetadataField, value: Option<String> },
    Body { source: SourceField, body: DocumentBody },
    SectionsOrder(Vec<String>),
    /// Sets `sections_embeddings.<method>` only.
    MethodEmbeddings { method: String, sections: SectionVectors },
    /// Replaces `sections_embeddings` in full.
    AllEmbeddings(SectionEmbeddings),
    /// Replaces `sections_translation` in full.
    SectionsTranslation(TranslationTable),
}

impl FieldUpdate {
    /// Build an update that copies `field` from `doc`.
    pub fn copy_from(doc: &Document, field: DocumentField) -> Self {
        match field {
            DocumentField::Metadata(field) => {
                let value = match field {
                    MetadataField::CordUid => doc.cord_uid.clone(),
                    MetadataField::Doi => doc.doi.clone(),
                    MetadataField::PublishTime => doc.publish_time.clone(),
                    MetadataField::Source => doc.source.clone(),
                    MetadataField::Title => doc.title.clone(),
                    MetadataField::Url => doc.url.clone(),
                };
                FieldUpdate::Metadata { field, value }
            }
            DocumentField::Raw => FieldUpdate::Body {
                source: SourceField::Raw,
                body: doc.raw.clone().unwrap_or_default(),
            },
            DocumentField::Clean => FieldUpdate::Body {
                source: SourceField::Clean,
                body: doc.clean.clone().unwrap_or_default(),
            },
            DocumentField::SectionsOrder => {
                FieldUpdate::SectionsOrder(doc.sections_order.clone().unwrap_or_default())
            }
            DocumentField::SectionsEmbeddings => {
                FieldUpdate::AllEmbeddings(doc.sections_embeddings.clone().unwrap_or_default())
            }
            DocumentField::SectionsTranslation => FieldUpdate::SectionsTranslation(
                doc.sections_translation.clone().unwrap_or_default(),
            ),
        }
    }

    pub fn apply(self, doc: &mut Document) {
        match self {
            FieldUpdate::Metadata { field, value } => {
                let slot = match field {
                    MetadataField::CordUid => &mut doc.cord_uid,
                    MetadataField::Doi => &mut doc.doi,
                    MetadataField::PublishTime => &mut doc.publish_time,
                    MetadataField::Source => &mut doc.source,
                    MetadataField::Title => &mut doc.title,
                    MetadataField::Url => &mut doc.url,
                };
                *slot = value;
            }
            FieldUpdate::Body { source, body } => *doc.body_mut(source) = Some(body),
            FieldUpdate::SectionsOrder(order) => doc.sections_order = Some(order),
            FieldUpdate::MethodEmbeddings { method, sections } => {
                doc.sections_embeddings
                    .get_or_insert_with(SectionEmbeddings::new)
                    .insert(method, sections);
            }
            FieldUpdate::AllEmbeddings(all) => doc.sections_embeddings = Some(all),
            FieldUpdate::SectionsTranslation(table) => doc.sections_translation = Some(table),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    InsertOne(Document),
    UpdateOne {
        hash_id: String,
        set: Vec<FieldUpdate>,
        upsert: bool,
    },
}

impl WriteOp {
    pub fn upsert(hash_id: impl Into<String>, set: Vec<FieldUpdate>) -> Self {
        WriteOp::UpdateOne { hash_id: hash_id.into(), set, upsert: true }
    }
}

// =============================================================================
// Store trait
// =============================================================================

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stream documents matching `filter`, reduced to `projection`.
    async fn find(&self, filter: &Filter, projection: &Projection) -> Result<DocumentStream>;

    /// Apply `ops` as one transaction.
    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<()>;

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let mut stream = self.find(filter, &Projection::new()).await?;
        let mut n = 0u64;
        while let Some(doc) = stream.next().await {
            doc?;
            n += 1;
        }
        Ok(n)
    }

    async fn exists(&self, hash_id: &str) -> Result<bool> {
        let mut stream = self
            .find(&Filter::hash_ids(vec![hash_id.to_string()]), &Projection::new())
            .await?;
        match stream.next().await {
            Some(doc) => doc.map(|_| true),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SectionTranslation, StoredVector};

    fn sample() -> Document {
        let mut doc = Document::new("h1");
        doc.title = Some("A paper".to_string());
        doc.raw = Some(DocumentBody::default());
        let mut embeddings = SectionEmbeddings::new();
        embeddings.insert("m1".to_string(), SectionVectors::new());
        embeddings.insert("m2".to_string(), SectionVectors::new());
        doc.sections_embeddings = Some(embeddings);
        doc
    }

    #[test]
    fn test_filter_missing_embedding() {
        let doc = sample();
        assert!(!Filter::missing_embedding("m1").matches(&doc));
        assert!(Filter::missing_embedding("m3").matches(&doc));
        assert!(Filter::all().matches(&doc));
    }

    #[test]
    fn test_matcher_selects_listed_ids() {
        let filter = Filter::hash_ids((0..5000).map(|i| format!("h{}", i)).collect());
        let matcher = filter.matcher();
        assert!(matcher.matches(&sample()));
        assert!(!matcher.matches(&Document::new("h5000")));

        let combined = Filter { missing_embedding: Some("m1".to_string()), ..filter.clone() };
        assert!(!combined.matcher().matches(&sample()));
        assert!(!Filter::hash_ids(vec![]).matches(&sample()));
    }

    #[test]
    fn test_filter_missing_translation_accepts_empty_table() {
        let mut doc = sample();
        assert!(Filter::missing_translation().matches(&doc));
        doc.sections_translation = Some(TranslationTable::new());
        assert!(Filter::missing_translation().matches(&doc));
        doc.sections_translation.as_mut().unwrap().insert(
            "Intro".to_string(),
            SectionTranslation { label: "introduction".to_string(), confidence: 0.8 },
        );
        assert!(!Filter::missing_translation().matches(&doc));
    }

    #[test]
    fn test_projection_keeps_only_requested_method() {
        let doc = Projection::new().with_embedding("m2").apply(sample());
        let embeddings = doc.sections_embeddings.unwrap();
        assert_eq!(embeddings.keys().collect::<Vec<_>>(), vec!["m2"]);
        assert!(doc.title.is_none());
        assert!(doc.raw.is_none());
    }

    #[test]
    fn test_method_embeddings_update_leaves_other_methods() {
        let mut doc = sample();
        let mut sections = SectionVectors::new();
        sections.insert("Abstract".to_string(), Some(StoredVector::encode(&[1.0], 1)));
        FieldUpdate::MethodEmbeddings { method: "m1".to_string(), sections }.apply(&mut doc);
        let embeddings = doc.sections_embeddings.unwrap();
        assert_eq!(embeddings["m1"].len(), 1);
        assert!(embeddings.contains_key("m2"));
    }

    #[test]
    fn test_copy_from_metadata() {
        let doc = sample();
        let update = FieldUpdate::copy_from(&doc, DocumentField::Metadata(MetadataField::Title));
        let mut target = Document::new("h1");
        update.apply(&mut target);
        assert_eq!(target.title.as_deref(), Some("A paper"));
    }
}
