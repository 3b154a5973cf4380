//! ragdb-vector
//!
//! The persisted half of retrieval: an exact inner-product `VectorIndex`, the
//! ordinal-aligned `ChunkStore` of record metadata, and `IndexedCorpus`, which
//! grows, searches and persists the two together.

pub mod corpus;
pub mod fsio;
pub mod index;
pub mod store;

pub use corpus::{CorpusPaths, CorpusStats, IndexedCorpus};
pub use index::VectorIndex;
pub use store::ChunkStore;
