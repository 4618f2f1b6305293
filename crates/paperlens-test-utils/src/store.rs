//! Store wrapper with injected failures.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use paperlens_db::{DbError, DocumentStore, DocumentStream, Filter, Projection, Result, WriteOp};

/// Delegates to an inner store but fails any transaction touching one of
/// the configured `hash_id`s.
pub struct FlakyStore {
    inner: Arc<dyn DocumentStore>,
    failing: Mutex<HashSet<String>>,
    transactions: AtomicUsize,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn DocumentStore>) -> Self {
        Self {
            inner,
            failing: Mutex::new(HashSet::new()),
            transactions: AtomicUsize::new(0),
        }
    }

    pub fn fail_writes_for(self, hash_id: &str) -> Self {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(hash_id.to_string());
        self
    }

    /// Number of committed transactions.
    pub fn transactions(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }
}

fn op_id(op: &WriteOp) -> &str {
    match op {
        WriteOp::InsertOne(doc) => &doc.hash_id,
        WriteOp::UpdateOne { hash_id, .. } => hash_id,
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn find(&self, filter: &Filter, projection: &Projection) -> Result<DocumentStream> {
        self.inner.find(filter, projection).await
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<()> {
        let failing = self.failing.lock().unwrap_or_else(|e| e.into_inner()).clone();
        if let Some(op) = ops.iter().find(|op| failing.contains(op_id(op))) {
            return Err(DbError::Transaction(format!("injected failure for {}", op_id(op))));
        }
        self.inner.transaction(ops).await?;
        self.transactions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
