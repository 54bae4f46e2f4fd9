//! Pluggable text-similarity backends: embedding cosine similarity,
//! TF-IDF cosine, and token-Jaccard (always available, no external
//! dependency). Selection prefers the richest backend available and falls
//! back gracefully.

mod embedding;
mod jaccard;
mod tfidf;

pub use embedding::EmbeddingBackend;
pub use jaccard::JaccardBackend;
pub use tfidf::TfIdfBackend;

use std::sync::Arc;

use crate::cache::Cache;
use crate::types::DecisionNode;

/// Lowercases, collapses internal whitespace, and trims `s`. Shared by every
/// similarity backend, by vote-option grouping, and by cache keys, so the
/// normalization rule is defined exactly once.
pub fn normalize_text(s: &str) -> String {
    let collapsed = s
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    collapsed.to_lowercase()
}

/// A scored candidate returned by [`SimilarityBackend::find_similar`].
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub id: String,
    pub question: String,
    pub score: f64,
}

/// A pluggable text-similarity scorer. Implementations must be symmetric,
/// must never panic (internal failures are caught and scored as `0.0`), and
/// must treat an empty-after-normalization input as maximally dissimilar.
pub trait SimilarityBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Scores `a` against `b` in `[0.0, 1.0]`. Returns `0.0` on internal
    /// failure or when either input normalizes to empty.
    fn compute_similarity(&self, a: &str, b: &str) -> f64;

    /// Scores `query` against every candidate, skipping candidates whose
    /// normalized question is empty, returning matches at or above
    /// `threshold` sorted by descending score.
    fn find_similar(&self, query: &str, candidates: &[DecisionNode], threshold: f64) -> Vec<ScoredCandidate> {
        if normalize_text(query).is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<ScoredCandidate> = candidates
            .iter()
            .filter(|c| !normalize_text(&c.question).is_empty())
            .map(|c| ScoredCandidate {
                id: c.id.clone(),
                question: c.question.clone(),
                score: self.compute_similarity(query, &c.question),
            })
            .filter(|sc| sc.score >= threshold)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }
}

/// Picks the richest backend available: embeddings, else TF-IDF, else
/// token-Jaccard (always available). Logs the choice.
///
/// `cache`, when given, is wired into the embedding backend's L2 layer so
/// repeated calls for the same text skip re-embedding. Pass `None` for
/// standalone backends with no retrieval cache to share (e.g. convergence
/// scoring between debate rounds).
pub fn select_backend(cache: Option<Arc<Cache>>) -> Arc<dyn SimilarityBackend> {
    #[cfg(feature = "embeddings")]
    {
        if let Some(backend) = EmbeddingBackend::try_new(cache) {
            tracing::info!(backend = backend.name(), "similarity backend selected");
            return Arc::new(backend);
        }
    }
    #[cfg(not(feature = "embeddings"))]
    let _ = cache;
    let backend = TfIdfBackend::new();
    tracing::info!(backend = backend.name(), "similarity backend selected");
    Arc::new(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates(qs: &[&str]) -> Vec<DecisionNode> {
        qs.iter()
            .map(|q| DecisionNode::new(*q, crate::types::ConvergenceStatus::Converged))
            .collect()
    }

    fn assert_backend_contract(backend: &dyn SimilarityBackend) {
        assert!(backend.compute_similarity("", "anything").abs() < 1e-9);
        assert!(backend.compute_similarity("anything", "").abs() < 1e-9);
        assert!(backend.compute_similarity("hello world", "hello world") >= 0.95);
        let ab = backend.compute_similarity("alpha beta", "gamma delta");
        let ba = backend.compute_similarity("gamma delta", "alpha beta");
        assert!((ab - ba).abs() < 1e-6);
    }

    #[test]
    fn jaccard_backend_satisfies_contract() {
        assert_backend_contract(&JaccardBackend);
    }

    #[test]
    fn tfidf_backend_satisfies_contract() {
        assert_backend_contract(&TfIdfBackend::new());
    }

    #[test]
    fn find_similar_skips_empty_candidates_and_sorts_descending() {
        let backend = JaccardBackend;
        let cands = candidates(&["rust ownership model", "", "rust borrow checker", "python gil"]);
        let results = backend.find_similar("rust ownership and borrowing", &cands, 0.0);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(results.iter().all(|r| !r.question.is_empty()));
    }
}
