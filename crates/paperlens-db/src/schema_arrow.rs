//! Arrow schema and conversion utilities for LanceDB.
//!
//! Scalars map to nullable Utf8 columns; nested fields are stored as JSON
//! text so partial updates can rewrite one column without a schema change.

use crate::error::{DbError, Result};
use crate::schema::Document;
use arrow_array::{Array, RecordBatch, StringArray};
use arrow_schema::{DataType, Field, Schema};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

pub const COL_HASH_ID: &str = "hash_id";
pub const COL_RAW: &str = "raw";
pub const COL_CLEAN: &str = "clean";
pub const COL_SECTIONS_ORDER: &str = "sections_order";
pub const COL_SECTIONS_EMBEDDINGS: &str = "sections_embeddings";
pub const COL_SECTIONS_TRANSLATION: &str = "sections_translation";

pub const METADATA_COLUMNS: [&str; 6] =
    ["cord_uid", "doi", "publish_time", "source", "title", "url"];

pub fn document_schema() -> Arc<Schema> {
    let mut fields = vec![Field::new(COL_HASH_ID, DataType::Utf8, false)];
    for name in METADATA_COLUMNS {
        fields.push(Field::new(name, DataType::Utf8, true));
    }
    for name in [
        COL_RAW,
        COL_CLEAN,
        COL_SECTIONS_ORDER,
        COL_SECTIONS_EMBEDDINGS,
        COL_SECTIONS_TRANSLATION,
    ] {
        fields.push(Field::new(name, DataType::Utf8, true));
    }
    Arc::new(Schema::new(fields))
}

fn to_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>> {
    value.as_ref().map(serde_json::to_string).transpose().map_err(DbError::from)
}

pub fn documents_to_record(docs: &[Document]) -> Result<RecordBatch> {
    let schema = document_schema();

    let mut hash_id = Vec::with_capacity(docs.len());
    let mut metadata: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(docs.len()); 6];
    let mut nested: Vec<Vec<Option<String>>> = vec![Vec::with_capacity(docs.len()); 5];

    for doc in docs {
        hash_id.push(doc.hash_id.clone());
        let scalars = [
            &doc.cord_uid,
            &doc.doi,
            &doc.publish_time,
            &doc.source,
            &doc.title,
            &doc.url,
        ];
        for (col, value) in metadata.iter_mut().zip(scalars) {
            col.push(value.clone());
        }
        nested[0].push(to_json(&doc.raw)?);
        nested[1].push(to_json(&doc.clean)?);
        nested[2].push(to_json(&doc.sections_order)?);
        nested[3].push(to_json(&doc.sections_embeddings)?);
        nested[4].push(to_json(&doc.sections_translation)?);
    }

    let mut columns: Vec<Arc<dyn Array>> = vec![Arc::new(StringArray::from(hash_id))];
    for col in metadata.into_iter().chain(nested) {
        columns.push(Arc::new(StringArray::from(col)));
    }

    RecordBatch::try_new(schema, columns).map_err(|e| DbError::Arrow(e.to_string()))
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<Option<&'a StringArray>> {
    match batch.column_by_name(name) {
        None => Ok(None),
        Some(col) => col
            .as_any()
            .downcast_ref::<StringArray>()
            .map(Some)
            .ok_or_else(|| DbError::Arrow(format!("column {} is not Utf8", name))),
    }
}

fn opt_string(batch: &RecordBatch, name: &str, row: usize) -> Result<Option<String>> {
    Ok(string_column(batch, name)?.and_then(|arr| {
        if arr.is_null(row) {
            None
        } else {
            Some(arr.value(row).to_string())
        }
    }))
}

fn opt_json<T: DeserializeOwned>(batch: &RecordBatch, name: &str, row: usize) -> Result<Option<T>> {
    match opt_string(batch, name, row)? {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

/// Convert one row back into a document. Columns missing from the batch
/// (not selected by the query) come back as `None`.
pub fn record_to_document(batch: &RecordBatch, row: usize) -> Result<Document> {
    let hash_id = opt_string(batch, COL_HASH_ID, row)?
        .ok_or_else(|| DbError::Arrow("row without hash_id".to_string()))?;

    Ok(Document {
        hash_id,
        cord_uid: opt_string(batch, "cord_uid", row)?,
        doi: opt_string(batch, "doi", row)?,
        publish_time: opt_string(batch, "publish_time", row)?,
        source: opt_string(batch, "source", row)?,
        title: opt_string(batch, "title", row)?,
        url: opt_string(batch, "url", row)?,
        raw: opt_json(batch, COL_RAW, row)?,
        clean: opt_json(batch, COL_CLEAN, row)?,
        sections_order: opt_json(batch, COL_SECTIONS_ORDER, row)?,
        sections_embeddings: opt_json(batch, COL_SECTIONS_EMBEDDINGS, row)?,
        sections_translation: opt_json(batch, COL_SECTIONS_TRANSLATION, row)?,
    })
}

pub fn record_to_documents(batch: &RecordBatch) -> Result<Vec<Document>> {
    (0..batch.num_rows()).map(|row| record_to_document(batch, row)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DocumentBody, SectionTranslation, TranslationTable};

    #[test]
    fn test_record_conversion_keeps_nested_fields() {
        let mut doc = Document::new("h1");
        doc.title = Some("Title".to_string());
        doc.raw = Some(DocumentBody::with_sections(
            vec![("Abstract", "text")].into_iter().collect(),
        ));
        let mut table = TranslationTable::new();
        table.insert(
            "Abstract".to_string(),
            SectionTranslation { label: "abstract".to_string(), confidence: 0.95 },
        );
        doc.sections_translation = Some(table);

        let batch = documents_to_record(&[doc.clone(), Document::new("h2")]).unwrap();
        assert_eq!(batch.num_rows(), 2);
        let docs = record_to_documents(&batch).unwrap();
        assert_eq!(docs[0], doc);
        assert_eq!(docs[1].hash_id, "h2");
        assert!(docs[1].raw.is_none());
    }

    #[test]
    fn test_projected_batch_without_columns() {
        let schema = Arc::new(Schema::new(vec![Field::new(COL_HASH_ID, DataType::Utf8, false)]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(StringArray::from(vec!["only-id"])) as Arc<dyn Array>],
        )
        .unwrap();
        let doc = record_to_document(&batch, 0).unwrap();
        assert_eq!(doc, Document::new("only-id"));
    }
}
