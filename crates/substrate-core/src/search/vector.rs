//! Vector index over 384-dimension observation embeddings.
//!
//! Wraps `usearch`'s HNSW index, keyed by the observation's text identifier rather than its
//! internal numeric handle. Persisted to a file alongside the database so it survives restarts;
//! `observations_vec` (storage::migrations) is the durable source of truth it is rebuilt from
//! when the on-disk index itself cannot be loaded.

use std::collections::HashMap;
use std::path::PathBuf;
use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::model::EMBEDDING_DIMENSIONS;

pub const DEFAULT_DIMENSIONS: usize = EMBEDDING_DIMENSIONS;
pub const DEFAULT_CONNECTIVITY: usize = 16;
pub const DEFAULT_EXPANSION_ADD: usize = 128;
pub const DEFAULT_EXPANSION_SEARCH: usize = 64;

#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum VectorSearchError {
    IndexCreation(String),
    IndexAdd(String),
    IndexSearch(String),
    IndexPersistence(String),
    InvalidDimensions(usize, usize),
}

impl std::fmt::Display for VectorSearchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IndexCreation(e) => write!(f, "index creation failed: {e}"),
            Self::IndexAdd(e) => write!(f, "failed to add vector: {e}"),
            Self::IndexSearch(e) => write!(f, "search failed: {e}"),
            Self::IndexPersistence(e) => write!(f, "persistence failed: {e}"),
            Self::InvalidDimensions(expected, got) => {
                write!(f, "invalid dimensions: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for VectorSearchError {}

#[derive(Debug, Clone)]
pub struct VectorIndexConfig {
    pub dimensions: usize,
    pub connectivity: usize,
    pub expansion_add: usize,
    pub expansion_search: usize,
    pub metric: MetricKind,
}

impl Default for VectorIndexConfig {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_DIMENSIONS,
            connectivity: DEFAULT_CONNECTIVITY,
            expansion_add: DEFAULT_EXPANSION_ADD,
            expansion_search: DEFAULT_EXPANSION_SEARCH,
            metric: MetricKind::Cos,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VectorIndexStats {
    pub total_vectors: usize,
    pub dimensions: usize,
    pub connectivity: usize,
}

/// HNSW vector index keyed by observation text identifier.
pub struct VectorIndex {
    index: Index,
    config: VectorIndexConfig,
    path: PathBuf,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

impl VectorIndex {
    fn build_index(config: &VectorIndexConfig) -> Result<Index, VectorSearchError> {
        let options = IndexOptions {
            dimensions: config.dimensions,
            metric: config.metric,
            quantization: ScalarKind::F32,
            connectivity: config.connectivity,
            expansion_add: config.expansion_add,
            expansion_search: config.expansion_search,
            multi: false,
        };
        Index::new(&options).map_err(|e| VectorSearchError::IndexCreation(e.to_string()))
    }

    /// Open the index persisted at `path`, or create a fresh empty one if no file exists there
    /// yet. A corrupt or unreadable existing file is treated as a failure, not silently reset —
    /// the caller (storage::connection::Storage::open) is responsible for deciding whether to
    /// delete it and retry, so that "vector index absent" stays an explicit, logged decision.
    pub fn open_or_create(path: PathBuf) -> Result<Self, VectorSearchError> {
        let config = VectorIndexConfig::default();

        if path.exists() {
            let index = Self::build_index(&config)?;
            index
                .load(
                    path.to_str()
                        .ok_or_else(|| VectorSearchError::IndexPersistence("non-utf8 path".into()))?,
                )
                .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;

            let mappings_path = path.with_extension("mappings.json");
            let mappings_str = std::fs::read_to_string(&mappings_path)
                .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;
            let mappings: serde_json::Value = serde_json::from_str(&mappings_str)
                .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;
            let key_to_id: HashMap<String, u64> =
                serde_json::from_value(mappings["key_to_id"].clone())
                    .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;
            let next_id = mappings["next_id"].as_u64().unwrap_or(0);
            let id_to_key = key_to_id.iter().map(|(k, &v)| (v, k.clone())).collect();

            Ok(Self { index, config, path, key_to_id, id_to_key, next_id })
        } else {
            let index = Self::build_index(&config)?;
            index
                .reserve(16)
                .map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;
            Ok(Self {
                index,
                config,
                path,
                key_to_id: HashMap::new(),
                id_to_key: HashMap::new(),
                next_id: 0,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn ensure_capacity(&self) -> Result<(), VectorSearchError> {
        let current_capacity = self.index.capacity();
        let current_size = self.index.size();
        if current_size >= current_capacity {
            let new_capacity = std::cmp::max(current_capacity * 2, 16);
            self.index
                .reserve(new_capacity)
                .map_err(|e| VectorSearchError::IndexCreation(e.to_string()))?;
        }
        Ok(())
    }

    /// Insert or update the vector for `key`. Keys are observation text identifiers.
    pub fn upsert(&mut self, key: &str, vector: &[f32]) -> Result<(), VectorSearchError> {
        if vector.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions(self.config.dimensions, vector.len()));
        }

        if let Some(&existing_id) = self.key_to_id.get(key) {
            self.index
                .remove(existing_id)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            self.ensure_capacity()?;
            self.index
                .add(existing_id, vector)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            return Ok(());
        }

        self.ensure_capacity()?;
        let id = self.next_id;
        self.next_id += 1;
        self.index
            .add(id, vector)
            .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<bool, VectorSearchError> {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            self.index
                .remove(id)
                .map_err(|e| VectorSearchError::IndexAdd(e.to_string()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_to_id.contains_key(key)
    }

    /// K-nearest-neighbor search, returning `(key, cosine_similarity)` pairs best-first.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>, VectorSearchError> {
        if query.len() != self.config.dimensions {
            return Err(VectorSearchError::InvalidDimensions(self.config.dimensions, query.len()));
        }
        if self.is_empty() {
            return Ok(vec![]);
        }

        let results = self
            .index
            .search(query, limit)
            .map_err(|e| VectorSearchError::IndexSearch(e.to_string()))?;

        let mut out = Vec::with_capacity(results.keys.len());
        for (key, distance) in results.keys.iter().zip(results.distances.iter()) {
            if let Some(string_key) = self.id_to_key.get(key) {
                out.push((string_key.clone(), 1.0 - distance));
            }
        }
        Ok(out)
    }

    /// Persist the index and its key mapping back to `path`.
    pub fn save(&self) -> Result<(), VectorSearchError> {
        let path_str = self
            .path
            .to_str()
            .ok_or_else(|| VectorSearchError::IndexPersistence("non-utf8 path".into()))?;
        self.index
            .save(path_str)
            .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;

        let mappings = serde_json::json!({ "key_to_id": self.key_to_id, "next_id": self.next_id });
        std::fs::write(self.path.with_extension("mappings.json"), mappings.to_string())
            .map_err(|e| VectorSearchError::IndexPersistence(e.to_string()))?;
        Ok(())
    }

    pub fn stats(&self) -> VectorIndexStats {
        VectorIndexStats {
            total_vectors: self.len(),
            dimensions: self.config.dimensions,
            connectivity: self.config.connectivity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vector(seed: f32) -> Vec<f32> {
        (0..DEFAULT_DIMENSIONS)
            .map(|i| ((i as f32 + seed) / DEFAULT_DIMENSIONS as f32).sin())
            .collect()
    }

    fn fresh_index() -> VectorIndex {
        let dir = tempfile::tempdir().unwrap();
        VectorIndex::open_or_create(dir.keep().join("test.usearch")).unwrap()
    }

    #[test]
    fn new_index_has_spec_dimensions() {
        let index = fresh_index();
        assert_eq!(index.dimensions(), 384);
        assert!(index.is_empty());
    }

    #[test]
    fn upsert_then_search_finds_itself_first() {
        let mut index = fresh_index();
        index.upsert("obs-1", &test_vector(1.0)).unwrap();
        index.upsert("obs-2", &test_vector(50.0)).unwrap();

        let results = index.search(&test_vector(1.0), 2).unwrap();
        assert_eq!(results[0].0, "obs-1");
    }

    #[test]
    fn wrong_dimension_vector_is_rejected() {
        let mut index = fresh_index();
        let err = index.upsert("obs-1", &[0.0, 1.0]).unwrap_err();
        assert!(matches!(err, VectorSearchError::InvalidDimensions(384, 2)));
    }

    #[test]
    fn remove_drops_the_key() {
        let mut index = fresh_index();
        index.upsert("obs-1", &test_vector(1.0)).unwrap();
        assert!(index.remove("obs-1").unwrap());
        assert!(!index.contains("obs-1"));
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("persisted.usearch");
        {
            let mut index = VectorIndex::open_or_create(path.clone()).unwrap();
            index.upsert("obs-1", &test_vector(1.0)).unwrap();
            index.save().unwrap();
        }
        let reloaded = VectorIndex::open_or_create(path).unwrap();
        assert!(reloaded.contains("obs-1"));
    }
}
