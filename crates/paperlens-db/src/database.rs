//! LanceDB-backed document store.
//!
//! One table, one row per document. Nested fields live in JSON columns, so
//! a transaction reads the rows it touches, applies every op in memory and
//! writes the results back with a single `merge_insert` keyed on `hash_id`.
//! That one commit is what makes a multi-op call all-or-nothing. Writes from
//! this process are serialized; writers in other processes race with
//! last-commit-wins semantics.

use crate::error::{DbError, Result};
use crate::schema::{self, Document};
use crate::schema_arrow::{
    document_schema, documents_to_record, record_to_documents, COL_CLEAN, COL_HASH_ID, COL_RAW,
    COL_SECTIONS_EMBEDDINGS, COL_SECTIONS_ORDER, COL_SECTIONS_TRANSLATION, METADATA_COLUMNS,
};
use crate::store::{DocumentStore, DocumentStream, EmbeddingProjection, Filter, Projection, WriteOp};
use arrow_array::RecordBatchIterator;
use async_trait::async_trait;
use futures::StreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::Table;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Main database handle.
#[derive(Clone)]
pub struct Database {
    conn: Connection,
    path: String,
    table: String,
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    /// Open or create a database at the specified path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_table(path, schema::TABLE_DOCUMENTS).await
    }

    pub async fn open_with_table(path: impl AsRef<Path>, table: &str) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        if !path.as_ref().exists() {
            std::fs::create_dir_all(path.as_ref())?;
        }

        let conn = lancedb::connect(&path_str).execute().await?;
        info!(path = %path_str, table, "Opened document store");

        Ok(Self {
            conn,
            path: path_str,
            table: table.to_string(),
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Get the database path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Create the documents table if it does not exist yet.
    pub async fn initialize(&self) -> Result<()> {
        if !self.table_exists(&self.table).await? {
            let schema = document_schema();
            let empty_iter = RecordBatchIterator::new(vec![], schema);
            self.conn.create_table(&self.table, empty_iter).execute().await?;
            info!(table = %self.table, "Created documents table");
        }
        Ok(())
    }

    /// Check if a table exists.
    pub async fn table_exists(&self, name: &str) -> Result<bool> {
        let tables = self.conn.table_names().execute().await?;
        Ok(tables.iter().any(|t| t == name))
    }

    async fn open_table(&self) -> Result<Table> {
        if !self.table_exists(&self.table).await? {
            return Err(DbError::NotInitialized);
        }
        Ok(self.conn.open_table(&self.table).execute().await?)
    }

    async fn load(&self, table: &Table, hash_id: &str) -> Result<Option<Document>> {
        let mut stream = table
            .query()
            .only_if(format!("{} = '{}'", COL_HASH_ID, escape(hash_id)))
            .execute()
            .await?;

        while let Some(batch) = stream.next().await {
            let batch = batch.map_err(|e| DbError::LanceDb(e.to_string()))?;
            if batch.num_rows() > 0 {
                return Ok(record_to_documents(&batch)?.into_iter().next());
            }
        }
        Ok(None)
    }

    async fn write_all(&self, table: &Table, docs: &[Document]) -> Result<()> {
        let record = documents_to_record(docs)?;
        let schema = record.schema();
        let iter = RecordBatchIterator::new(vec![Ok(record)], schema);

        let mut builder = table.merge_insert(&[COL_HASH_ID]);
        builder.when_matched_update_all(None).when_not_matched_insert_all();
        builder.execute(Box::new(iter)).await?;
        Ok(())
    }
}

/// Rows a transaction will commit, in first-touch order.
#[derive(Default)]
struct Staged {
    docs: Vec<Document>,
    index: HashMap<String, usize>,
}

impl Staged {
    fn push(&mut self, doc: Document) -> &mut Document {
        let i = self.docs.len();
        self.index.insert(doc.hash_id.clone(), i);
        self.docs.push(doc);
        &mut self.docs[i]
    }
}

fn escape(value: &str) -> String {
    value.replace('\'', "''")
}

fn selected_columns(filter: &Filter, projection: &Projection) -> Vec<&'static str> {
    let mut columns = vec![COL_HASH_ID];
    if projection.metadata {
        columns.extend(METADATA_COLUMNS);
    }
    if projection.raw {
        columns.push(COL_RAW);
    }
    if projection.clean {
        columns.push(COL_CLEAN);
    }
    if projection.sections_order {
        columns.push(COL_SECTIONS_ORDER);
    }
    if projection.embeddings != EmbeddingProjection::None || filter.missing_embedding.is_some() {
        columns.push(COL_SECTIONS_EMBEDDINGS);
    }
    if projection.translation || filter.missing_translation {
        columns.push(COL_SECTIONS_TRANSLATION);
    }
    columns
}

#[async_trait]
impl DocumentStore for Database {
    async fn find(&self, filter: &Filter, projection: &Projection) -> Result<DocumentStream> {
        let table = self.open_table().await?;

        let mut query = table.query();
        if let Some(ids) = &filter.hash_ids {
            if ids.is_empty() {
                return Ok(futures::stream::empty().boxed());
            }
            let list = ids
                .iter()
                .map(|id| format!("'{}'", escape(id)))
                .collect::<Vec<_>>()
                .join(", ");
            query = query.only_if(format!("{} IN ({})", COL_HASH_ID, list));
        }

        let columns = selected_columns(filter, projection);
        debug!(?columns, "Scanning documents");
        let stream = query.select(Select::columns(columns.as_slice())).execute().await?;

        let filter = filter.clone();
        let projection = projection.clone();
        let docs = stream
            .map(move |batch| -> Vec<Result<Document>> {
                let batch = match batch {
                    Ok(batch) => batch,
                    Err(e) => return vec![Err(DbError::LanceDb(e.to_string()))],
                };
                let matcher = filter.matcher();
                match record_to_documents(&batch) {
                    Ok(docs) => docs
                        .into_iter()
                        .filter(|doc| matcher.matches(doc))
                        .map(|doc| Ok(projection.apply(doc)))
                        .collect(),
                    Err(e) => vec![Err(e)],
                }
            })
            .flat_map(futures::stream::iter);

        Ok(docs.boxed())
    }

    async fn transaction(&self, ops: Vec<WriteOp>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let table = self.open_table().await?;

        // Nothing reaches the table until every op has applied cleanly.
        let mut staged = Staged::default();
        for op in ops {
            match op {
                WriteOp::InsertOne(doc) => {
                    if staged.index.contains_key(&doc.hash_id)
                        || self.load(&table, &doc.hash_id).await?.is_some()
                    {
                        return Err(DbError::Duplicate(doc.hash_id));
                    }
                    staged.push(doc);
                }
                WriteOp::UpdateOne { hash_id, set, upsert } => {
                    let doc = if let Some(&i) = staged.index.get(&hash_id) {
                        &mut staged.docs[i]
                    } else {
                        match self.load(&table, &hash_id).await? {
                            Some(doc) => staged.push(doc),
                            None if upsert => staged.push(Document::new(hash_id)),
                            None => continue,
                        }
                    };
                    for update in set {
                        update.apply(doc);
                    }
                }
            }
        }

        if staged.docs.is_empty() {
            return Ok(());
        }
        debug!(rows = staged.docs.len(), "Committing transaction");
        self.write_all(&table, &staged.docs).await
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        if filter.is_all() {
            let table = self.open_table().await?;
            return Ok(table.count_rows(None).await? as u64);
        }
        let mut stream = self.find(filter, &Projection::new()).await?;
        let mut n = 0u64;
        while let Some(doc) = stream.next().await {
            doc?;
            n += 1;
        }
        Ok(n)
    }
}
