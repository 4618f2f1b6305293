//! In-process document store.
//!
//! Keeps documents in insertion order behind a single `RwLock`; a
//! transaction validates every op before applying any, so it commits
//! all-or-nothing.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::RwLock;

use crate::error::{DbError, Result};
use crate::schema::Document;
use crate::store::{DocumentStore, DocumentStream, Filter, Projection, WriteOp};

#[derive(Default)]
struct State {
    docs: Vec<Document>,
    index: HashMap<String, usize>,
}

impl State {
    fn push(&mut self, doc: Document) {
        self.index.insert(doc.hash_id.clone(), self.docs.len());
        self.docs.push(doc);
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Full copy of one document, bypassing projection.
    pub async fn get(&self, hash_id: &str) -> Option<Document> {
        let state = self.state.read().await;
        state.index.get(hash_id).map(|&i| state.docs[i].clone())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn find(&self, filter: &Filter, projection: &Projection) -> Result<DocumentStream> {
        let state = self.state.read().await;
        let matcher = filter.matcher();
        let docs: Vec<Document> = state
            .docs
            .iter()
            .filter(|doc| matcher.matches(doc))
            .map(|doc| projection.apply(doc.clone()))
            .collect();
        Ok(futures::stream::iter(docs.into_iter().map(Ok)).boxed())
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<()> {
        let mut state = self.state.write().await;

        let mut pending: HashSet<&str> = HashSet::new();
        for op in &ops {
            if let WriteOp::InsertOne(doc) = op {
                if state.index.contains_key(&doc.hash_id) || !pending.insert(doc.hash_id.as_str()) {
                    return Err(DbError::Duplicate(doc.hash_id.clone()));
                }
            }
        }

        for op in ops {
            match op {
                WriteOp::InsertOne(doc) => state.push(doc),
                WriteOp::UpdateOne { hash_id, set, upsert } => {
                    let idx = match state.index.get(&hash_id) {
                        Some(&i) => i,
                        None if upsert => {
                            state.push(Document::new(hash_id.clone()));
                            state.docs.len() - 1
                        }
                        None => continue,
                    };
                    let doc = &mut state.docs[idx];
                    for update in set {
                        update.apply(doc);
                    }
                }
            }
        }
        Ok(())
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let state = self.state.read().await;
        let matcher = filter.matcher();
        Ok(state.docs.iter().filter(|doc| matcher.matches(doc)).count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{SectionVectors, StoredVector};
    use crate::store::FieldUpdate;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_insert_then_find_in_order() {
        let store = MemoryStore::new();
        store
            .transaction(vec![
                WriteOp::InsertOne(Document::new("b")),
                WriteOp::InsertOne(Document::new("a")),
            ])
            .await
            .unwrap();
        let docs: Vec<Document> = store
            .find(&Filter::all(), &Projection::new())
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let ids: Vec<_> = docs.iter().map(|d| d.hash_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_duplicate_insert_aborts_whole_transaction() {
        let store = MemoryStore::new();
        store.transaction(vec![WriteOp::InsertOne(Document::new("a"))]).await.unwrap();
        let err = store
            .transaction(vec![
                WriteOp::InsertOne(Document::new("c")),
                WriteOp::InsertOne(Document::new("a")),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Duplicate(id) if id == "a"));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_without_upsert_ignores_missing() {
        let store = MemoryStore::new();
        store
            .transaction(vec![WriteOp::UpdateOne {
                hash_id: "ghost".to_string(),
                set: vec![FieldUpdate::SectionsOrder(vec![])],
                upsert: false,
            }])
            .await
            .unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_upsert_creates_and_sets_method_field() {
        let store = MemoryStore::new();
        let mut sections = SectionVectors::new();
        sections.insert("Abstract".to_string(), Some(StoredVector::encode(&[0.5, 0.5], 2)));
        sections.insert("Methods".to_string(), None);
        store
            .transaction(vec![WriteOp::upsert(
                "new",
                vec![FieldUpdate::MethodEmbeddings { method: "m1".to_string(), sections }],
            )])
            .await
            .unwrap();
        let doc = store.get("new").await.unwrap();
        assert!(doc.has_embedding("m1"));
        assert!(store.exists("new").await.unwrap());
        assert_eq!(store.count(&Filter::missing_embedding("m1")).await.unwrap(), 0);
    }
}
