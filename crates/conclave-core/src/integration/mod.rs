//! Graph integration facade: the single entry point the deliberation
//! orchestrator uses to persist completed deliberations and fetch retrieval
//! context. Every operation except [`GraphIntegration::store_deliberation`]'s
//! persistence step degrades gracefully instead of propagating errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::cache::Cache;
use crate::config::DecisionGraphConfig;
use crate::error::StorageError;
use crate::retriever::Retriever;
use crate::similarity::{select_backend, SimilarityBackend};
use crate::storage::Storage;
use crate::types::{ConvergenceStatus, DecisionNode, ParticipantStance};
use crate::worker::{compute_and_store_similarities, BackgroundWorker, Priority};

/// The minimal shape of a deliberation result the facade needs in order to
/// persist it. The orchestrator crate's richer result type maps onto this.
pub struct DeliberationOutcome {
    pub participants: Vec<String>,
    pub consensus: String,
    pub winning_option: Option<String>,
    pub convergence_status: ConvergenceStatus,
    pub transcript_path: String,
    pub metadata: HashMap<String, serde_json::Value>,
    /// Each participant's final-round text, keyed by participant id.
    pub final_positions: HashMap<String, String>,
    /// Each participant's parsed vote, if any: (option, confidence, rationale).
    pub votes: HashMap<String, (Option<String>, Option<f64>, Option<String>)>,
}

#[derive(Debug, Clone, Default)]
pub struct HealthReport {
    pub healthy: bool,
    pub checks_passed: u32,
    pub checks_failed: u32,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GraphMetrics {
    pub total_decisions: u64,
}

const STATS_LOG_INTERVAL: u64 = 100;
const GROWTH_LOG_INTERVAL: u64 = 500;
const CAPACITY_WARNING_THRESHOLD: u64 = 4500;

pub struct GraphIntegration {
    storage: Arc<Storage>,
    retriever: Retriever,
    backend: Arc<dyn SimilarityBackend>,
    worker: Option<Arc<BackgroundWorker>>,
    config: DecisionGraphConfig,
    decision_count: AtomicU64,
}

impl GraphIntegration {
    pub fn new(storage: Arc<Storage>, config: DecisionGraphConfig) -> Self {
        let cache = Arc::new(Cache::new(
            config.query_cache_size,
            config.embedding_cache_size,
            Duration::from_secs(config.query_ttl_secs),
        ));
        let backend = select_backend(Some(Arc::clone(&cache)));
        let retriever = Retriever::new(Arc::clone(&storage), Arc::clone(&backend), config.clone(), Arc::clone(&cache));
        let worker = Some(Arc::new(BackgroundWorker::new(
            Arc::clone(&storage),
            Arc::clone(&backend),
            config.worker_max_queue_size,
            config.worker_batch_size,
            config.similarity_threshold,
        )));

        let count = storage.count_nodes().unwrap_or(0);
        Self {
            storage,
            retriever,
            backend,
            worker,
            config,
            decision_count: AtomicU64::new(count),
        }
    }

    /// Starts the background worker. Safe to call repeatedly.
    pub fn ensure_worker_started(&self) {
        if let Some(worker) = &self.worker {
            worker.start();
        }
    }

    /// Persists a completed deliberation as a [`DecisionNode`] plus one
    /// [`ParticipantStance`] per participant, enqueues similarity
    /// computation (falling back to synchronous scoring if the worker
    /// can't accept the job), and invalidates the retrieval cache.
    ///
    /// This is the one operation whose persistence failure propagates.
    pub async fn store_deliberation(&self, question: &str, outcome: DeliberationOutcome) -> Result<String, StorageError> {
        let mut node = DecisionNode::new(question, outcome.convergence_status);
        node.consensus = outcome.consensus;
        node.winning_option = outcome.winning_option;
        node.participants = outcome.participants.clone();
        node.transcript_path = outcome.transcript_path;
        node.metadata = outcome.metadata;

        let id = self.storage.save_node(&node)?;

        for participant in &outcome.participants {
            let final_position = outcome
                .final_positions
                .get(participant)
                .cloned()
                .unwrap_or_default();
            let mut stance = ParticipantStance::new(&id, participant, final_position);
            if let Some((option, confidence, rationale)) = outcome.votes.get(participant) {
                stance.vote_option = option.clone();
                stance.confidence = *confidence;
                stance.rationale = rationale.clone();
            }
            self.storage.save_stance(&stance)?;
        }

        self.ensure_worker_started();
        self.enqueue_or_fallback(&id).await;

        self.retriever.invalidate_cache();

        let count = self.decision_count.fetch_add(1, Ordering::SeqCst) + 1;
        self.log_maintenance_cadence(count);

        Ok(id)
    }

    async fn enqueue_or_fallback(&self, decision_id: &str) {
        let Some(worker) = &self.worker else {
            self.fallback_synchronous(decision_id);
            return;
        };
        if !worker.is_running() {
            self.fallback_synchronous(decision_id);
            return;
        }
        let enqueue_result = worker
            .enqueue(decision_id.to_string(), Priority::High, Duration::ZERO)
            .await;
        if enqueue_result.is_err() {
            tracing::warn!(decision_id = %decision_id, "enqueue failed, falling back to synchronous similarity computation");
            self.fallback_synchronous(decision_id);
        }
    }

    fn fallback_synchronous(&self, decision_id: &str) {
        if let Ok(count) = self.storage.count_nodes() {
            if count as usize > self.config.synchronous_fallback_limit {
                tracing::warn!(decision_id = %decision_id, "graph too large for synchronous similarity fallback, skipping");
                return;
            }
        }
        if let Err(e) = compute_and_store_similarities(
            &self.storage,
            self.backend.as_ref(),
            decision_id,
            self.config.worker_batch_size,
            self.config.similarity_threshold,
        ) {
            tracing::warn!(error = %e, decision_id = %decision_id, "synchronous similarity fallback failed");
        }
    }

    fn log_maintenance_cadence(&self, count: u64) {
        if count % STATS_LOG_INTERVAL == 0 {
            tracing::info!(total_decisions = count, "decision graph stats checkpoint");
        }
        if count % GROWTH_LOG_INTERVAL == 0 {
            tracing::info!(total_decisions = count, "decision graph growth checkpoint");
        }
        if count >= CAPACITY_WARNING_THRESHOLD {
            tracing::warn!(total_decisions = count, threshold = CAPACITY_WARNING_THRESHOLD, "decision graph approaching capacity");
        }
    }

    /// Returns formatted retrieval context for `question`, or `""` on any
    /// internal failure. Emits one structured MEASUREMENT log line.
    pub fn get_context_for_deliberation(&self, question: &str) -> String {
        let formatted = self.retriever.get_enriched_context(question);
        let db_size = self.storage.count_nodes().unwrap_or(0);
        let truncated_question: String = question.chars().take(80).collect();
        tracing::info!(
            target: "conclave_core::integration::measurement",
            question = %truncated_question,
            scored_count = formatted.scored_count,
            strong = formatted.tier_distribution.strong,
            moderate = formatted.tier_distribution.moderate,
            brief = formatted.tier_distribution.brief,
            tokens_used = formatted.tokens_used,
            token_budget = self.config.context_token_budget,
            db_size,
            "MEASUREMENT: context retrieval"
        );
        formatted.text
    }

    /// Read-only access to the retriever, used by query surfaces that need
    /// similarity search without going through deliberation-context framing.
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Read-only access to the underlying store, used by query surfaces that
    /// need direct lookups (by id, or recent-node scans).
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn graph_metrics(&self) -> GraphMetrics {
        GraphMetrics {
            total_decisions: self.storage.count_nodes().unwrap_or(0),
        }
    }

    pub fn health_check(&self) -> HealthReport {
        let mut report = HealthReport {
            healthy: true,
            ..Default::default()
        };
        match self.storage.count_orphans() {
            Ok((stances, edges)) if stances == 0 && edges == 0 => report.checks_passed += 1,
            Ok((stances, edges)) => {
                report.checks_failed += 1;
                report.healthy = false;
                report.issues.push(format!("{stances} orphaned stances, {edges} orphaned edges"));
            }
            Err(e) => {
                report.checks_failed += 1;
                report.healthy = false;
                report.issues.push(format!("orphan check failed: {e}"));
            }
        }
        match self.storage.count_future_timestamps(chrono::Duration::days(1)) {
            Ok(0) => report.checks_passed += 1,
            Ok(n) => {
                report.checks_failed += 1;
                report.healthy = false;
                report.issues.push(format!("{n} decisions with future timestamps"));
            }
            Err(e) => {
                report.checks_failed += 1;
                report.healthy = false;
                report.issues.push(format!("timestamp check failed: {e}"));
            }
        }
        match self.storage.count_out_of_range_scores() {
            Ok(0) => report.checks_passed += 1,
            Ok(n) => {
                report.checks_failed += 1;
                report.healthy = false;
                report.issues.push(format!("{n} similarity scores out of [0,1]"));
            }
            Err(e) => {
                report.checks_failed += 1;
                report.healthy = false;
                report.issues.push(format!("score range check failed: {e}"));
            }
        }
        report
    }

    pub async fn shutdown(&self, timeout: Duration) {
        if let Some(worker) = &self.worker {
            worker.stop(timeout).await;
        }
    }
}
