//! Adaptive-k candidate retrieval and tiered, token-budgeted context
//! formatting, grounded in the original system's `decision_graph/retrieval.py`.

mod format;

pub use format::{FormattedContext, Tier, TierCounts};

use std::sync::Arc;

use crate::cache::{Cache, QueryCacheKey};
use crate::config::DecisionGraphConfig;
use crate::similarity::{normalize_text, SimilarityBackend};
use crate::storage::Storage;
use crate::types::{DecisionNode, SimilarityMatch};

/// The cache-key threshold tag the retriever always uses, regardless of the
/// configured noise floor. Intentional: see module docs in `cache`.
const CACHE_KEY_THRESHOLD_TAG: f64 = 0.0;

pub struct Retriever {
    storage: Arc<Storage>,
    backend: Arc<dyn SimilarityBackend>,
    /// Shared with `backend` when it's an `EmbeddingBackend`, so the L1
    /// query cache here and the L2 embedding cache inside the backend are
    /// the same instance rather than two independently-bounded caches.
    cache: Arc<Cache>,
    config: DecisionGraphConfig,
}

impl Retriever {
    pub fn new(storage: Arc<Storage>, backend: Arc<dyn SimilarityBackend>, config: DecisionGraphConfig, cache: Arc<Cache>) -> Self {
        Self {
            storage,
            backend,
            cache,
            config,
        }
    }

    /// Finds past decisions relevant to `question`, honoring the L1 cache,
    /// the configured query window, and the adaptive-k policy.
    pub fn find_relevant(&self, question: &str) -> Vec<SimilarityMatch> {
        let normalized = normalize_text(question);
        if normalized.is_empty() {
            return Vec::new();
        }

        let recent = match self.storage.list_nodes(self.config.query_window, 0) {
            Ok(nodes) => nodes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load recent nodes for retrieval");
                return Vec::new();
            }
        };
        let k = self.config.adaptive_k.k_for(recent.len());
        let key = QueryCacheKey::new(normalized.clone(), CACHE_KEY_THRESHOLD_TAG, k);

        let scored = if let Some(cached) = self.cache.get_query(&key) {
            cached
        } else {
            let mut found = self.backend.find_similar(question, &recent, self.config.noise_floor);
            // Defensive re-filter: a custom backend might not honor the threshold.
            found.retain(|c| c.score >= self.config.noise_floor);
            found.truncate(k);
            self.cache.put_query(key, found.clone());
            found
        };

        // Hydrate by id; silently drop ids that no longer resolve.
        scored
            .into_iter()
            .filter_map(|c| match self.storage.get_node(&c.id) {
                Ok(Some(node)) => Some(SimilarityMatch { node, score: c.score }),
                _ => None,
            })
            .collect()
    }

    /// Composes [`Self::find_relevant`] with [`format::format_context_tiered`]
    /// using the configured budget and tier boundaries. Never fails: any
    /// internal error yields an empty string.
    pub fn get_enriched_context(&self, question: &str) -> FormattedContext {
        let scored = self.find_relevant(question);
        format::format_context_tiered(
            &scored,
            self.config.tier_boundaries,
            self.config.noise_floor,
            self.config.context_token_budget,
        )
    }

    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all_queries();
    }

    pub fn cache_stats(&self) -> crate::cache::CacheStatsSnapshot {
        self.cache.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::JaccardBackend;
    use crate::types::ConvergenceStatus;
    use std::sync::Arc;
    use std::time::Duration;

    fn retriever() -> Retriever {
        let storage = Arc::new(Storage::open_in_memory().unwrap());
        let config = DecisionGraphConfig::default();
        let cache = Arc::new(Cache::new(config.query_cache_size, config.embedding_cache_size, Duration::from_secs(config.query_ttl_secs)));
        Retriever::new(storage, Arc::new(JaccardBackend), config, cache)
    }

    #[test]
    fn empty_graph_returns_empty_context() {
        let r = retriever();
        let ctx = r.get_enriched_context("Should we ship the release?");
        assert!(ctx.text.is_empty() || ctx.scored_count == 0);
    }

    #[test]
    fn stores_and_retrieves_similar_question() {
        let r = retriever();
        let mut node = DecisionNode::new("Should we adopt the new caching layer", ConvergenceStatus::Converged);
        node.consensus = "Yes, adopt it".into();
        r.storage.save_node(&node).unwrap();
        r.invalidate_cache();

        let matches = r.find_relevant("Should we adopt the new caching layer design");
        assert!(!matches.is_empty());
    }
}
