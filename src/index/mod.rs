//! Similarity index for product reference embeddings.
//!
//! Provides the flat inner-product `ProductIndex`, its two-artifact
//! snapshot persistence, and `SharedIndex`, the single-writer /
//! multi-reader owner shared across detection and catalog calls.

pub mod distance;
pub mod flat;
pub mod shared;
pub mod snapshot;

pub use flat::{IndexEntry, IndexStats, ProductIndex, SearchHit, INDEX_TYPE};
pub use shared::SharedIndex;
