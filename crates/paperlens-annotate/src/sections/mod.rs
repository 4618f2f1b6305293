//! Section classification.
//!
//! Assigns each titled section of a document one canonical label
//! (abstract, methods, ...) from title-keyword similarity, a fallback text
//! classifier and positional priors, and stores the result as the
//! document's translation table.

pub mod engine;
pub mod position;
pub mod reference;
pub mod title;

pub use engine::{ClassificationReport, SectionClassificationEngine, SectionOutcome, SectionState};
pub use position::PositionModel;
pub use reference::{LabelDefinition, SectionReference};
pub use title::normalize_title;
