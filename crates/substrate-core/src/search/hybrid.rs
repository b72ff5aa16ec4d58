//! Hybrid search: fuses keyword and vector results with a fixed linear combination of two
//! [0,1]-normalized scores. Deliberately simpler than a rank-fusion scheme — the weighting is a
//! known constant, not a heuristic tuned per corpus. An item found by only one of the two paths
//! keeps that path's single normalized score rather than being penalized for the other path's
//! absence.

use std::collections::HashMap;

fn normalize(results: &[(String, f32)]) -> HashMap<String, f32> {
    let max = results.iter().map(|(_, s)| *s).fold(0.0_f32, f32::max).max(0.001);
    results.iter().map(|(key, score)| (key.clone(), score / max)).collect()
}

/// Weighted sum of normalized keyword and vector scores. Each input list is assumed sorted
/// best-first. A key present in only one list keeps that list's normalized score undiluted by
/// the other weight; a key present in both gets the weighted blend.
pub fn linear_combination(
    keyword_results: &[(String, f32)],
    vector_results: &[(String, f32)],
    keyword_weight: f32,
    vector_weight: f32,
) -> Vec<(String, f32)> {
    let keyword_norm = normalize(keyword_results);
    let vector_norm = normalize(vector_results);

    let mut scores: HashMap<String, f32> = HashMap::new();
    for (key, score) in &keyword_norm {
        scores.insert(key.clone(), *score);
    }
    for (key, score) in &vector_norm {
        scores
            .entry(key.clone())
            .and_modify(|existing| {
                // Present in both: replace the single-source score with the weighted blend.
                *existing = *existing * keyword_weight + score * vector_weight;
            })
            .or_insert(*score);
    }

    let mut results: Vec<(String, f32)> = scores.into_iter().collect();
    results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    results
}

#[derive(Debug, Clone)]
pub struct HybridSearchConfig {
    pub keyword_weight: f32,
    pub vector_weight: f32,
    /// Multiplier applied to the caller's requested result count when pulling from each source,
    /// so the fusion step has enough candidates to rank from before truncating to the final
    /// limit ("both searches (size-capped)" in the spec).
    pub source_limit_multiplier: usize,
}

impl Default for HybridSearchConfig {
    fn default() -> Self {
        Self { keyword_weight: 0.4, vector_weight: 0.6, source_limit_multiplier: 3 }
    }
}

pub struct HybridSearcher {
    config: HybridSearchConfig,
}

impl Default for HybridSearcher {
    fn default() -> Self {
        Self::new()
    }
}

impl HybridSearcher {
    pub fn new() -> Self {
        Self { config: HybridSearchConfig::default() }
    }

    pub fn with_config(config: HybridSearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &HybridSearchConfig {
        &self.config
    }

    /// Fuse two already-retrieved result lists. If `vector_results` is empty (no query
    /// embedding, or the vector index is unavailable), the fusion degrades to keyword-only
    /// ranking with no error.
    pub fn fuse(
        &self,
        keyword_results: &[(String, f32)],
        vector_results: &[(String, f32)],
    ) -> Vec<(String, f32)> {
        linear_combination(
            keyword_results,
            vector_results,
            self.config.keyword_weight,
            self.config.vector_weight,
        )
    }

    pub fn effective_source_limit(&self, target_limit: usize) -> usize {
        target_limit * self.config.source_limit_multiplier
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_hits_outrank_single_source_hits() {
        let keyword = vec![("a".to_string(), 1.0), ("b".to_string(), 0.5)];
        let vector = vec![("a".to_string(), 1.0), ("c".to_string(), 0.5)];

        let results = linear_combination(&keyword, &vector, 0.5, 0.5);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn single_source_hit_keeps_its_own_normalized_score() {
        let keyword = vec![("a".to_string(), 1.0)];
        let vector: Vec<(String, f32)> = vec![];

        let results = linear_combination(&keyword, &vector, 0.4, 0.6);
        assert_eq!(results[0], ("a".to_string(), 1.0));
    }

    #[test]
    fn empty_vector_source_degrades_to_keyword_only() {
        let keyword = vec![("a".to_string(), 0.9), ("b".to_string(), 0.3)];
        let vector: Vec<(String, f32)> = vec![];
        let results = linear_combination(&keyword, &vector, 0.4, 0.6);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn effective_source_limit_applies_multiplier() {
        let searcher = HybridSearcher::new();
        assert_eq!(searcher.effective_source_limit(10), 30);
    }
}
