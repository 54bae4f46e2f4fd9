//! Decision graph domain types: [`DecisionNode`], [`ParticipantStance`] and
//! [`DecisionSimilarity`], plus the closed [`ConvergenceStatus`] enum.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum length a participant's final position is truncated to before
/// being persisted.
pub const FINAL_POSITION_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    Converged,
    Diverging,
    Refining,
    Impasse,
    MaxRounds,
    UnanimousConsensus,
    MajorityDecision,
    Tie,
    Unknown,
}

impl std::fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| "unknown".to_string());
        write!(f, "{s}")
    }
}

/// A permanent record of one completed deliberation. Created once by the
/// integration facade; never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionNode {
    pub id: String,
    pub question: String,
    pub timestamp: DateTime<Utc>,
    pub consensus: String,
    pub winning_option: Option<String>,
    pub convergence_status: ConvergenceStatus,
    pub participants: Vec<String>,
    pub transcript_path: String,
    pub metadata: HashMap<String, Value>,
}

impl DecisionNode {
    pub fn new(question: impl Into<String>, convergence_status: ConvergenceStatus) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            question: question.into(),
            timestamp: Utc::now(),
            consensus: String::new(),
            winning_option: None,
            convergence_status,
            participants: Vec::new(),
            transcript_path: String::new(),
            metadata: HashMap::new(),
        }
    }
}

/// One participant's final position in one decision. Multiple stances for
/// the same `(decision_id, participant)` pair may exist across rounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantStance {
    pub decision_id: String,
    pub participant: String,
    pub vote_option: Option<String>,
    pub confidence: Option<f64>,
    pub rationale: Option<String>,
    pub final_position: String,
}

impl ParticipantStance {
    pub fn new(decision_id: impl Into<String>, participant: impl Into<String>, final_position: impl Into<String>) -> Self {
        let mut final_position = final_position.into();
        if final_position.chars().count() > FINAL_POSITION_MAX_CHARS {
            final_position = final_position.chars().take(FINAL_POSITION_MAX_CHARS).collect();
        }
        Self {
            decision_id: decision_id.into(),
            participant: participant.into(),
            vote_option: None,
            confidence: None,
            rationale: None,
            final_position,
        }
    }
}

/// A directed weighted edge asserting semantic similarity between two
/// decisions. The `(source_id, target_id)` pair is unique; rewrites replace
/// the prior row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSimilarity {
    pub source_id: String,
    pub target_id: String,
    pub similarity_score: f64,
    pub computed_at: DateTime<Utc>,
}

/// One scored match returned by the similarity backend / retriever.
#[derive(Debug, Clone)]
pub struct SimilarityMatch {
    pub node: DecisionNode,
    pub score: f64,
}
