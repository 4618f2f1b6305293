//! Shared fixtures for paperlens tests: document builders, deterministic
//! model fakes and a store wrapper that injects write failures.

pub mod builders;
pub mod models;
pub mod store;

pub use builders::{seeded_store, DocumentBuilder};
pub use models::{MockClassifier, MockEmbedder};
pub use store::FlakyStore;
