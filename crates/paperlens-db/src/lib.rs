//! paperlens Database Layer
//!
//! Document store client for the paper corpus. Documents are keyed by a
//! stable content hash (`hash_id`) and carry the parsed paper bodies plus the
//! derived fields written by the annotation core.
//!
//! # Features
//!
//! - Embedded LanceDB store (no external server required)
//! - In-memory store with the same contract, for tests and small corpora
//! - Filtered, projected reads as lazy streams
//! - Partial-field upserts grouped into transactions
//! - Versioned binary encoding for stored vectors
//!
//! # Example
//!
//! ```rust,no_run
//! use paperlens_db::{Database, DocumentRepository};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::open("./data/paperlens.db").await?;
//!     db.initialize().await?;
//!
//!     let documents = DocumentRepository::new(std::sync::Arc::new(db));
//!     println!("{} documents", documents.stats().await?.documents);
//!
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod database;
pub mod documents;
pub mod error;
pub mod memory;
pub mod schema;
pub mod schema_arrow;
pub mod store;

pub use database::Database;
pub use documents::{translate_sections, CorpusStats, DocumentRepository};
pub use error::{DbError, Result};
pub use memory::MemoryStore;
pub use schema::{
    Citation, Document, DocumentBody, RawDocument, Section, SectionEmbeddings, SectionMap,
    SectionTranslation, SectionVectors, SourceField, StoredVector, TranslationTable,
    TABLE_DOCUMENTS,
};
pub use store::{
    DocumentField, DocumentStore, DocumentStream, EmbeddingProjection, FieldUpdate, Filter,
    FilterMatcher, MetadataField, Projection, WriteOp,
};
