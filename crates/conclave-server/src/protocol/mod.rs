//! External interface envelope (the §6 boundary contract): request/response
//! structs exchanged with [`crate::service::DeliberationService`]. Wiring
//! these to a concrete transport (stdio, HTTP, JSON-RPC) is the caller's
//! concern; this module only defines the shapes.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::orchestrator::{DeliberationResult, Mode};

#[derive(Debug, Clone, Deserialize)]
pub struct DeliberateWireRequest {
    pub question: String,
    pub participants: Vec<String>,
    pub rounds: Option<u32>,
    #[serde(default)]
    pub mode: Option<String>,
    pub working_directory: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliberateWireResponse {
    pub status: String,
    pub mode: String,
    pub rounds_completed: u32,
    pub participants: Vec<String>,
    pub summary: String,
    pub transcript_path: String,
    pub full_debate: Vec<TranscriptEntry>,
    pub full_debate_truncated: bool,
    pub total_rounds: u32,
    pub convergence_status: String,
    pub voting: VotingSummary,
    pub graph_context_summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptEntry {
    pub round: u32,
    pub participant: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct VotingSummary {
    pub final_tally: HashMap<String, u32>,
    pub consensus_reached: bool,
    pub winning_option: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_type: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(error_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_type: error_type.into(),
            status: "failed".to_string(),
        }
    }
}

/// Flat wire shape for `query_decisions`; validated into [`QuerySelector`]
/// before use so downstream code never has to re-check "exactly one field set".
#[derive(Debug, Clone, Deserialize, Default)]
pub struct QueryDecisionsWireRequest {
    pub query_text: Option<String>,
    #[serde(default)]
    pub find_contradictions: bool,
    pub decision_id: Option<String>,
    pub limit: Option<usize>,
    pub format: Option<String>,
}

#[derive(Debug, Clone)]
pub enum QuerySelector {
    Text(String),
    FindContradictions,
    DecisionId(String),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum QuerySelectorError {
    #[error("exactly one of query_text, find_contradictions, decision_id must be set; none were")]
    NoneSet,
    #[error("exactly one of query_text, find_contradictions, decision_id must be set; more than one were")]
    MultipleSet,
}

impl TryFrom<&QueryDecisionsWireRequest> for QuerySelector {
    type Error = QuerySelectorError;

    fn try_from(wire: &QueryDecisionsWireRequest) -> Result<Self, Self::Error> {
        let set_count = wire.query_text.is_some() as u8 + wire.find_contradictions as u8 + wire.decision_id.is_some() as u8;
        match set_count {
            0 => Err(QuerySelectorError::NoneSet),
            1 => {
                if let Some(text) = &wire.query_text {
                    Ok(QuerySelector::Text(text.clone()))
                } else if wire.find_contradictions {
                    Ok(QuerySelector::FindContradictions)
                } else {
                    Ok(QuerySelector::DecisionId(wire.decision_id.clone().expect("exactly one set")))
                }
            }
            _ => Err(QuerySelectorError::MultipleSet),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DecisionSummary {
    pub id: String,
    pub question: String,
    pub consensus: String,
    pub winning_option: Option<String>,
    pub convergence_status: String,
    pub participants: Vec<String>,
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryDecisionsResponse {
    pub results: Vec<DecisionSummary>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ListModelsRequest {
    pub adapter: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListModelsResponse {
    pub models: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetSessionModelsRequest {
    /// Adapter name -> model override, or `null` to clear the override.
    pub selections: HashMap<String, Option<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SetSessionModelsResponse {
    pub applied: HashMap<String, Option<String>>,
}

/// One line of the stdio-JSON-lines demo transport: `{"op": "...", ...}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WireRequest {
    Deliberate(DeliberateWireRequest),
    QueryDecisions(QueryDecisionsWireRequest),
    ListModels(ListModelsRequest),
    SetSessionModels(SetSessionModelsRequest),
}

pub(crate) fn mode_from_wire(raw: Option<&str>) -> Result<Mode, String> {
    match raw {
        None | Some("conference") => Ok(Mode::Conference),
        Some("quick") => Ok(Mode::Quick),
        Some(other) => Err(format!("unknown mode '{other}', expected 'quick' or 'conference'")),
    }
}

pub(crate) fn mode_to_wire(mode: Mode) -> &'static str {
    match mode {
        Mode::Quick => "quick",
        Mode::Conference => "conference",
    }
}

/// Truncates `result.full_debate` to the last `max_rounds_kept` rounds if the
/// rendered transcript would otherwise exceed `response_budget_chars`. A
/// presentation-layer concern applied only at the service boundary; C10's
/// own [`DeliberationResult`] is never truncated internally.
pub(crate) fn to_wire_response(result: DeliberationResult, response_budget_chars: usize) -> DeliberateWireResponse {
    let total_rounds = result.rounds_completed;
    let mut entries: Vec<TranscriptEntry> = result
        .full_debate
        .iter()
        .map(|r| TranscriptEntry {
            round: r.round,
            participant: r.participant.clone(),
            text: r.text.clone(),
        })
        .collect();

    let rendered_len: usize = entries.iter().map(|e| e.text.len()).sum();
    let mut truncated = false;
    if rendered_len > response_budget_chars && total_rounds > 1 {
        let participants_per_round = result.participants.len().max(1);
        let mut kept_rounds = total_rounds;
        while kept_rounds > 1 {
            let keep_from = entries.len().saturating_sub(kept_rounds as usize * participants_per_round);
            let kept_len: usize = entries[keep_from..].iter().map(|e| e.text.len()).sum();
            if kept_len <= response_budget_chars {
                break;
            }
            kept_rounds -= 1;
        }
        let keep_from = entries.len().saturating_sub(kept_rounds as usize * participants_per_round);
        if keep_from > 0 {
            entries.drain(0..keep_from);
            truncated = true;
        }
    }

    DeliberateWireResponse {
        status: result.status,
        mode: mode_to_wire(result.mode).to_string(),
        rounds_completed: result.rounds_completed,
        participants: result.participants,
        summary: result.summary,
        transcript_path: result.transcript_path,
        full_debate: entries,
        full_debate_truncated: truncated,
        total_rounds,
        convergence_status: result.convergence_status.to_string(),
        voting: VotingSummary {
            final_tally: result.voting_result.final_tally,
            consensus_reached: result.voting_result.consensus_reached,
            winning_option: result.voting_result.winning_option,
        },
        graph_context_summary: result.graph_context_summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_rejects_none_and_multiple() {
        let none = QueryDecisionsWireRequest::default();
        assert!(matches!(QuerySelector::try_from(&none), Err(QuerySelectorError::NoneSet)));

        let both = QueryDecisionsWireRequest {
            query_text: Some("x".into()),
            find_contradictions: true,
            ..Default::default()
        };
        assert!(matches!(QuerySelector::try_from(&both), Err(QuerySelectorError::MultipleSet)));
    }

    #[test]
    fn selector_accepts_exactly_one() {
        let wire = QueryDecisionsWireRequest {
            decision_id: Some("abc".into()),
            ..Default::default()
        };
        assert!(matches!(QuerySelector::try_from(&wire), Ok(QuerySelector::DecisionId(id)) if id == "abc"));
    }
}
