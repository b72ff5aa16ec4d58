//! Search layer.
//!
//! Keyword search over the `observations_fts` external-content index, vector K-nearest-neighbors
//! over the HNSW index, and a hybrid fusion of the two.

mod hybrid;
mod keyword;
mod vector;

pub use hybrid::{linear_combination, HybridSearchConfig, HybridSearcher};
pub use keyword::{sanitize_fts5_query, KeywordHit, KeywordSearcher};
pub use vector::{
    VectorIndex, VectorIndexConfig, VectorIndexStats, VectorSearchError, DEFAULT_CONNECTIVITY,
    DEFAULT_DIMENSIONS,
};
