//! Document builders.

use std::sync::Arc;

use paperlens_db::{Document, DocumentStore, MemoryStore, RawDocument, SectionMap, WriteOp};

/// Builds an ingested paper with sections in insertion order.
#[derive(Debug, Clone)]
pub struct DocumentBuilder {
    raw: RawDocument,
}

impl DocumentBuilder {
    pub fn new(hash_id: &str) -> Self {
        Self {
            raw: RawDocument {
                hash_id: hash_id.to_string(),
                title: Some(format!("Paper {}", hash_id)),
                ..Default::default()
            },
        }
    }

    pub fn title(mut self, title: &str) -> Self {
        self.raw.title = Some(title.to_string());
        self
    }

    pub fn doi(mut self, doi: &str) -> Self {
        self.raw.doi = Some(doi.to_string());
        self
    }

    pub fn section(mut self, title: &str, text: &str) -> Self {
        self.raw.sections.insert(title, text);
        if !self.raw.sections_order.iter().any(|t| t == title) {
            self.raw.sections_order.push(title.to_string());
        }
        self
    }

    pub fn sections(&self) -> &SectionMap {
        &self.raw.sections
    }

    pub fn build(self) -> RawDocument {
        self.raw
    }

    pub fn build_document(self) -> Document {
        Document::from_raw(self.raw)
    }
}

/// In-memory store pre-loaded with `raws`.
pub async fn seeded_store(raws: Vec<RawDocument>) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    let ops = raws.into_iter().map(|raw| WriteOp::InsertOne(Document::from_raw(raw))).collect();
    store
        .transaction(ops)
        .await
        .unwrap_or_else(|e| panic!("seeding store failed: {}", e));
    store
}
