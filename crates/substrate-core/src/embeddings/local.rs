//! Local semantic embeddings.
//!
//! Uses `fastembed`'s ONNX runtime for fully offline inference. The model produces
//! `EMBEDDING_DIMENSIONS`-wide vectors directly — unlike the wider general-purpose embedding
//! models, no Matryoshka truncation step is needed or applied, since the observation store's
//! schema (and the vector index built on top of it) is fixed at 384 dimensions end to end.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Mutex;

use crate::model::EMBEDDING_DIMENSIONS;

/// Maximum text length, in bytes, submitted to the model. Longer content is truncated — the
/// embedding is a retrieval aid, not a lossless encoding.
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size used when embedding multiple texts in one model call.
pub const BATCH_SIZE: usize = 32;

/// Label recorded alongside every embedding this service produces (`Observation::embedding_model`).
pub const MODEL_LABEL: &str = "bge-small-en-v1.5";

/// Version recorded alongside every embedding this service produces
/// (`Observation::embedding_version`). Bump when the model or its preprocessing changes in a way
/// that makes previously-stored vectors incomparable with newly-generated ones.
pub const MODEL_VERSION: i64 = 1;

#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum EmbeddingError {
    ModelInit(String),
    EmbeddingFailed(String),
    InvalidInput(String),
}

impl std::fmt::Display for EmbeddingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ModelInit(e) => write!(f, "model initialization failed: {e}"),
            Self::EmbeddingFailed(e) => write!(f, "embedding generation failed: {e}"),
            Self::InvalidInput(e) => write!(f, "invalid input: {e}"),
        }
    }
}

impl std::error::Error for EmbeddingError {}

fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("SUBSTRATE_FASTEMBED_CACHE") {
        return std::path::PathBuf::from(path);
    }
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "substrate") {
        return proj_dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

/// Owns the loaded ONNX model. Construction is the only fallible, slow step — everything after
/// `load()` succeeds is a pure CPU computation. Not `Sync`: callers that need to share one across
/// threads go through [`super::EmbeddingWorker`] rather than wrapping this directly, matching the
/// spec's requirement that the model is owned exclusively by one worker thread and never
/// reentered.
pub struct LocalEmbedder {
    model: Mutex<TextEmbedding>,
}

impl LocalEmbedder {
    /// Load the model from the local cache (or download it there on first run). This is the
    /// single point of failure the enrichment scheduler treats as a degradable startup error:
    /// on failure, embedding stays unavailable for the remainder of the process lifetime.
    pub fn load() -> Result<Self, EmbeddingError> {
        let cache = cache_dir();
        std::fs::create_dir_all(&cache).map_err(|e| {
            EmbeddingError::ModelInit(format!("cache dir {cache:?} not writable: {e}"))
        })?;

        let options = InitOptions::new(EmbeddingModel::BGESmallENV15)
            .with_show_download_progress(false)
            .with_cache_dir(cache);

        let model = TextEmbedding::try_new(options)
            .map_err(|e| EmbeddingError::ModelInit(e.to_string()))?;

        Ok(Self { model: Mutex::new(model) })
    }

    fn truncate(text: &str) -> &str {
        if text.len() > MAX_TEXT_LENGTH {
            let mut end = MAX_TEXT_LENGTH;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            &text[..end]
        } else {
            text
        }
    }

    /// Embed a single piece of text, returning an `EMBEDDING_DIMENSIONS`-wide vector.
    pub fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if text.is_empty() {
            return Err(EmbeddingError::InvalidInput("text must not be empty".into()));
        }
        let text = Self::truncate(text);

        let mut model = self.model.lock().expect("embedder mutex poisoned");
        let mut embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        let vector = embeddings
            .pop()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding produced".into()))?;

        if vector.len() != EMBEDDING_DIMENSIONS {
            return Err(EmbeddingError::EmbeddingFailed(format!(
                "model produced {} dimensions, expected {EMBEDDING_DIMENSIONS}",
                vector.len()
            )));
        }
        Ok(vector)
    }

    /// Embed several texts in one model call, in batches of [`BATCH_SIZE`].
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let mut model = self.model.lock().expect("embedder mutex poisoned");
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            let truncated: Vec<&str> = chunk.iter().map(|t| Self::truncate(t)).collect();
            let embeddings = model
                .embed(truncated, None)
                .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;
            out.extend(embeddings);
        }
        Ok(out)
    }
}

/// Cosine similarity between two equal-length vectors. Returns `0.0` for mismatched lengths
/// rather than panicking — callers in the search layer treat a dimension mismatch as "no
/// similarity" rather than an error, since it only arises from a stale embedding-model version.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = (norm_a * norm_b).sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

/// Cosine distance, `1 - cosine_similarity`, used by the topic-shift detector against its
/// `[0.15, 0.60]`-clamped adaptive threshold.
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Serialize an embedding to the fixed little-endian byte layout stored in `observations.embedding`
/// and `observations_vec.embedding`.
pub fn embedding_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize an embedding from its stored byte layout. Returns `None` for a length that isn't a
/// multiple of 4 bytes rather than panicking; a corrupt blob is treated as "no embedding" by
/// repository callers.
pub fn embedding_from_bytes(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}
