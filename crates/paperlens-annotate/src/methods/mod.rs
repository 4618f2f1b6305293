//! Built-in embedding methods.

pub mod bert;
pub mod hashing;

pub use bert::BertMeanMethod;
pub use hashing::HashedBowMethod;
