//! paperlens Annotation Core
//!
//! Computes per-section embedding vectors with pluggable algorithm modules
//! and labels document sections with canonical roles (abstract, methods,
//! results, ...).
//!
//! # Components
//! - [`MethodRegistry`]: name → lazily initialized [`EmbeddingMethod`]
//! - [`ResultCache`]: TTL memoization of derived results
//! - [`Dispatcher`]: runs a method over the corpus on the execution
//!   strategy the method declares, one transaction per document
//! - [`SectionClassificationEngine`]: title-keyword similarity, fallback
//!   classifier and positional priors, one translation table per document
//!
//! # Example
//! ```rust,no_run
//! use paperlens_annotate::AnnotationContext;
//! use paperlens_config::Config;
//! use paperlens_db::SourceField;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let ctx = AnnotationContext::open(Config::load()?).await?;
//!     ctx.register_builtin_methods()?;
//!
//!     let report = ctx.dispatcher().compute_vectors("hashed-bow", SourceField::Raw, false).await?;
//!     println!("{} written, {} failed", report.written, report.failed.len());
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod method;
pub mod methods;
pub mod registry;
pub mod sections;
pub mod strategy;

pub use cache::{Clock, ManualClock, ResultCache, SystemClock, DEFAULT_TTL};
pub use context::AnnotationContext;
pub use dispatcher::{
    DispatchProgress, DispatchReport, DispatchSettings, Dispatcher, DocumentVector, FailedDocument,
};
pub use error::{AnnotateError, Result};
pub use method::{
    ComputedSections, EmbeddingMethod, ExecutionBackend, SectionVector, WorkerSlot,
};
pub use methods::{BertMeanMethod, HashedBowMethod};
pub use registry::MethodRegistry;
pub use sections::{
    ClassificationReport, SectionClassificationEngine, SectionOutcome, SectionReference,
    SectionState,
};
pub use strategy::{
    select_strategy, AffinityPool, ExecutionStrategy, ProcessPool, Sequential, ThreadPool,
};
