//! Deliberation orchestrator (C10): the round-based state machine that
//! drives adapters through a multi-round debate, collects votes, detects
//! convergence, and persists the outcome to the decision graph.

mod prompt;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use conclave_core::integration::{DeliberationOutcome, GraphIntegration};
use conclave_core::similarity::SimilarityBackend;
use thiserror::Error;

use crate::adapter::{error_marker, AdapterError, AdapterRegistry, InvokeRequest};
use crate::config::{default_summarizer_chain, DeliberationConfig};
use crate::convergence::{ConvergenceDetector, ConvergenceInfo, ConvergenceStatus as EngineConvergenceStatus};
use crate::tool_exec::{parse_tool_requests, ToolExecutor, ToolRequest, ToolResult};
use crate::vote::{aggregate_votes, parse_vote, Vote, VotingResult};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("storage error while persisting deliberation: {0}")]
    Storage(#[from] conclave_core::StorageError),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Quick,
    Conference,
}

#[derive(Debug, Clone)]
pub struct ParticipantSpec {
    /// Opaque id of the form `<model>@<backend>`.
    pub id: String,
    pub adapter: String,
    pub model: String,
}

#[derive(Debug, Clone)]
pub struct DeliberateRequest {
    pub question: String,
    pub participants: Vec<ParticipantSpec>,
    pub rounds: Option<u32>,
    pub mode: Mode,
    pub working_directory: String,
}

#[derive(Debug, Clone)]
pub struct ToolInvocationRecord {
    pub round: u32,
    pub requester: String,
    pub request_name: String,
    pub result: ToolResult,
    pub timestamp: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RoundResponse {
    pub round: u32,
    pub participant: String,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct DeliberationResult {
    pub status: String,
    pub mode: Mode,
    pub rounds_completed: u32,
    pub participants: Vec<String>,
    pub summary: String,
    pub transcript_path: String,
    pub full_debate: Vec<RoundResponse>,
    pub convergence_info: ConvergenceInfo,
    pub voting_result: VotingResult,
    pub convergence_status: conclave_core::ConvergenceStatus,
    pub graph_context_summary: String,
    pub tool_execution_history: Vec<ToolInvocationRecord>,
}

pub struct DeliberationEngine {
    adapters: AdapterRegistry,
    graph: Option<Arc<GraphIntegration>>,
    tool_executor: Option<ToolExecutor>,
    similarity_backend: Option<Arc<dyn SimilarityBackend>>,
    config: DeliberationConfig,
}

impl DeliberationEngine {
    pub fn new(
        adapters: AdapterRegistry,
        graph: Option<Arc<GraphIntegration>>,
        tool_executor: Option<ToolExecutor>,
        similarity_backend: Option<Arc<dyn SimilarityBackend>>,
        config: DeliberationConfig,
    ) -> Self {
        Self {
            adapters,
            graph,
            tool_executor,
            similarity_backend,
            config,
        }
    }

    pub async fn execute(&self, request: DeliberateRequest) -> Result<DeliberationResult, OrchestratorError> {
        if request.question.chars().count() < 10 {
            return Err(OrchestratorError::InvalidRequest("question must be at least 10 characters".into()));
        }
        if request.participants.len() < 2 {
            return Err(OrchestratorError::InvalidRequest("at least 2 participants are required".into()));
        }

        let mut tool_history: Vec<ToolInvocationRecord> = Vec::new();

        let graph_context = self
            .graph
            .as_ref()
            .map(|g| g.get_context_for_deliberation(&request.question))
            .unwrap_or_default();
        let graph_context_summary = summarize_context_tiers(&graph_context);
        let file_tree = self.build_file_tree_context(&request.working_directory);

        let rounds_to_execute = match request.mode {
            Mode::Quick => 1,
            Mode::Conference => request.rounds.unwrap_or(self.config.max_rounds).min(self.config.max_rounds),
        };

        let mut all_responses: Vec<RoundResponse> = Vec::new();
        let mut previous_round_texts: HashMap<String, String> = HashMap::new();
        let mut convergence_detector = ConvergenceDetector::new(self.config.engine_convergence_config());
        let mut convergence_info = ConvergenceInfo::default();
        let mut raw_votes: HashMap<String, Vote> = HashMap::new();
        let mut rounds_completed = 0u32;

        for round_num in 1..=rounds_to_execute {
            let mut current_round_texts: HashMap<String, String> = HashMap::new();
            let mut in_round_context = String::new();

            for participant in &request.participants {
                let prompt = prompt::build_prompt(
                    &request.question,
                    round_num,
                    rounds_to_execute,
                    if round_num == 1 { Some(graph_context.as_str()) } else { None },
                    if round_num == 1 { file_tree.as_deref() } else { None },
                    &in_round_context,
                    &recent_tool_context(&tool_history, round_num, self.config.tool_context_max_rounds, self.config.tool_output_max_chars),
                    self.tool_executor.is_some(),
                );

                let adapter = self.adapters.get(&participant.adapter).cloned();
                let response_text = match adapter {
                    Some(adapter) => {
                        let invoke_req = InvokeRequest {
                            prompt,
                            model: participant.model.clone(),
                            context: None,
                            is_deliberation: true,
                            working_directory: request.working_directory.clone(),
                        };
                        match adapter.invoke(invoke_req).await {
                            Ok(text) => text,
                            Err(e) => error_marker(&e),
                        }
                    }
                    None => error_marker(&AdapterError::Runtime { message: format!("unknown adapter: {}", participant.adapter) }),
                };

                if let Some(executor) = &self.tool_executor {
                    for tool_request in parse_tool_requests(&response_text) {
                        let result = executor.execute_tool(&tool_request, Some(std::path::Path::new(&request.working_directory))).await;
                        tool_history.push(ToolInvocationRecord {
                            round: round_num,
                            requester: participant.id.clone(),
                            request_name: tool_request.name.clone(),
                            result,
                            timestamp: Utc::now(),
                        });
                    }
                }

                if let Some(vote) = parse_vote(&response_text) {
                    raw_votes.insert(participant.id.clone(), vote);
                }

                in_round_context.push_str(&format!("\n### {}\n{}\n", participant.id, response_text));
                current_round_texts.insert(participant.id.clone(), response_text.clone());
                all_responses.push(RoundResponse {
                    round: round_num,
                    participant: participant.id.clone(),
                    text: response_text,
                });
            }

            rounds_completed = round_num;

            if round_num >= 2 {
                if let Some(backend) = &self.similarity_backend {
                    convergence_info = convergence_detector.check_round(backend.as_ref(), round_num, &previous_round_texts, &current_round_texts);
                }
            }
            previous_round_texts = current_round_texts;

            if self.should_early_stop(&raw_votes, request.participants.len(), round_num) {
                break;
            }
            if convergence_info.detected {
                break;
            }
        }

        let summary = self.generate_summary(&request, &all_responses).await;

        let voting_result = aggregate_votes(self.similarity_backend.as_deref(), &raw_votes);
        let final_status = determine_final_status(&voting_result, &convergence_info, rounds_completed, rounds_to_execute);

        let participants: Vec<String> = request.participants.iter().map(|p| p.id.clone()).collect();
        let final_positions: HashMap<String, String> = all_responses
            .iter()
            .rev()
            .fold(HashMap::new(), |mut acc, r| {
                acc.entry(r.participant.clone()).or_insert_with(|| r.text.clone());
                acc
            });

        let votes_for_storage: HashMap<String, (Option<String>, Option<f64>, Option<String>)> = raw_votes
            .iter()
            .map(|(participant, vote)| (participant.clone(), (Some(vote.option.clone()), Some(vote.confidence), Some(vote.rationale.clone()))))
            .collect();

        if let Some(graph) = &self.graph {
            let outcome = DeliberationOutcome {
                participants: participants.clone(),
                consensus: summary.clone(),
                winning_option: voting_result.winning_option.clone(),
                convergence_status: final_status,
                transcript_path: String::new(),
                metadata: HashMap::new(),
                final_positions,
                votes: votes_for_storage,
            };
            graph.store_deliberation(&request.question, outcome).await?;
        }

        Ok(DeliberationResult {
            status: "complete".to_string(),
            mode: request.mode,
            rounds_completed,
            participants,
            summary,
            transcript_path: String::new(),
            full_debate: all_responses,
            convergence_info,
            voting_result,
            convergence_status: final_status,
            graph_context_summary,
            tool_execution_history: tool_history,
        })
    }

    /// Renders the working directory layout for round-1 injection, bounded
    /// by `config.file_tree`. Returns `None` when disabled, no working
    /// directory was given, or the walk fails (e.g. the path doesn't exist) —
    /// the deliberation proceeds without it rather than failing outright.
    fn build_file_tree_context(&self, working_directory: &str) -> Option<String> {
        if !self.config.file_tree.enabled || working_directory.is_empty() {
            return None;
        }
        let path = std::path::Path::new(working_directory);
        match crate::tool_exec::render_file_tree(path, self.config.file_tree.max_depth, self.config.file_tree.max_files) {
            Ok(tree) if !tree.is_empty() => Some(tree),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, working_directory, "skipping file-tree injection");
                None
            }
        }
    }

    fn should_early_stop(&self, raw_votes: &HashMap<String, Vote>, participant_count: usize, round_num: u32) -> bool {
        if !self.config.early_stopping.enabled {
            return false;
        }
        if self.config.early_stopping.respect_min_rounds && round_num < self.config.min_rounds {
            return false;
        }
        if raw_votes.is_empty() {
            return false;
        }
        let stop_votes = raw_votes.values().filter(|v| v.continue_debate == Some(false)).count();
        stop_votes as f64 / participant_count as f64 >= self.config.early_stopping.threshold
    }

    async fn generate_summary(&self, request: &DeliberateRequest, responses: &[RoundResponse]) -> String {
        for (adapter_name, model, display_name) in default_summarizer_chain() {
            if let Some(adapter) = self.adapters.get(&adapter_name) {
                let transcript = responses.iter().map(|r| format!("{}: {}", r.participant, r.text)).collect::<Vec<_>>().join("\n\n");
                let prompt = format!(
                    "Summarize the following deliberation on \"{}\" in 2-3 sentences:\n\n{}",
                    request.question, transcript
                );
                let invoke_req = InvokeRequest {
                    prompt,
                    model,
                    context: None,
                    is_deliberation: false,
                    working_directory: request.working_directory.clone(),
                };
                if let Ok(summary) = adapter.invoke(invoke_req).await {
                    return summary;
                }
                tracing::warn!(summarizer = %display_name, "summarizer adapter invocation failed, trying next in chain");
            }
        }
        "No summary available: no summarizer adapter responded.".to_string()
    }
}

fn recent_tool_context(history: &[ToolInvocationRecord], current_round: u32, max_rounds: u32, max_chars: usize) -> String {
    let min_round = current_round.saturating_sub(max_rounds).max(1);
    let mut out = String::new();
    for record in history.iter().filter(|r| r.round >= min_round && r.round < current_round) {
        let mut output = record.result.output.clone();
        if output.chars().count() > max_chars {
            let truncated: String = output.chars().take(max_chars).collect();
            let dropped_chars = output.chars().count() - max_chars;
            let dropped_lines = output.lines().count().saturating_sub(truncated.lines().count());
            output = format!("{truncated}\n... [truncated {dropped_chars} chars, {dropped_lines} lines]");
        }
        out.push_str(&format!("\n[tool:{}] {} -> {}\n", record.request_name, record.requester, output));
    }
    out
}

/// Counts tier-labelled headers already present in the rendered context
/// markdown as a best-effort post-hoc summary, avoiding widening the
/// retriever's public contract just for this logging convenience.
fn summarize_context_tiers(context: &str) -> String {
    if context.is_empty() {
        return "No similar past deliberations found.".to_string();
    }
    let strong = context.matches("strong match").count();
    let moderate = context.matches("moderate match").count();
    let brief = context.matches("Brief Match").count();
    let total = strong + moderate + brief;
    format!("{total} decision(s) injected ({strong} strong, {moderate} moderate, {brief} brief)")
}

fn determine_final_status(
    voting: &VotingResult,
    convergence: &ConvergenceInfo,
    rounds_completed: u32,
    max_rounds: u32,
) -> conclave_core::ConvergenceStatus {
    use conclave_core::ConvergenceStatus as Status;

    if voting.consensus_reached {
        return Status::UnanimousConsensus;
    }
    if voting.winning_option.is_some() {
        return Status::MajorityDecision;
    }
    if !voting.final_tally.is_empty() && voting.winning_option.is_none() {
        return Status::Tie;
    }
    match convergence.status {
        EngineConvergenceStatus::Converged => Status::Converged,
        EngineConvergenceStatus::Impasse => Status::Impasse,
        EngineConvergenceStatus::Diverging => Status::Diverging,
        EngineConvergenceStatus::Refining => Status::Refining,
        _ if rounds_completed >= max_rounds => Status::MaxRounds,
        _ => Status::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::EchoAdapter;
    use std::sync::Arc;

    fn participant(id: &str) -> ParticipantSpec {
        ParticipantSpec { id: id.to_string(), adapter: id.to_string(), model: "test-model".to_string() }
    }

    fn engine_with(adapters: AdapterRegistry) -> DeliberationEngine {
        DeliberationEngine::new(adapters, None, None, None, DeliberationConfig::default())
    }

    #[tokio::test]
    async fn quick_mode_runs_exactly_one_round() {
        let mut adapters: AdapterRegistry = HashMap::new();
        adapters.insert("a".into(), Arc::new(EchoAdapter::new("a", "response A")));
        adapters.insert("b".into(), Arc::new(EchoAdapter::new("b", "response B")));
        let engine = engine_with(adapters);

        let request = DeliberateRequest {
            question: "Should we ship the release this week?".into(),
            participants: vec![participant("a"), participant("b")],
            rounds: Some(5),
            mode: Mode::Quick,
            working_directory: ".".into(),
        };
        let result = engine.execute(request).await.unwrap();
        assert_eq!(result.rounds_completed, 1);
        assert_eq!(result.status, "complete");
    }

    #[tokio::test]
    async fn adapter_failure_does_not_halt_round() {
        use crate::adapter::FlakyAdapter;
        let mut adapters: AdapterRegistry = HashMap::new();
        adapters.insert("a".into(), Arc::new(FlakyAdapter::new(Box::new(EchoAdapter::new("a", "response A")), [0])));
        adapters.insert("b".into(), Arc::new(EchoAdapter::new("b", "response B")));
        let engine = engine_with(adapters);

        let request = DeliberateRequest {
            question: "Should we ship the release this week?".into(),
            participants: vec![participant("a"), participant("b")],
            rounds: Some(1),
            mode: Mode::Quick,
            working_directory: ".".into(),
        };
        let result = engine.execute(request).await.unwrap();
        assert!(result.rounds_completed >= 1);
        let a_response = result.full_debate.iter().find(|r| r.participant == "a").unwrap();
        assert!(a_response.text.contains("[ERROR:"));
        let b_response = result.full_debate.iter().find(|r| r.participant == "b").unwrap();
        assert_eq!(b_response.text, "response B");
    }

    #[tokio::test]
    async fn file_tree_injected_only_when_enabled_and_directory_given() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("lib.rs"), "").unwrap();

        let mut adapters: AdapterRegistry = HashMap::new();
        adapters.insert("a".into(), Arc::new(EchoAdapter::new("a", "{prompt}")));
        adapters.insert("b".into(), Arc::new(EchoAdapter::new("b", "response B")));

        let engine = DeliberationEngine::new(adapters.clone(), None, None, None, DeliberationConfig::default());
        let request = DeliberateRequest {
            question: "Should we restructure this directory?".into(),
            participants: vec![participant("a"), participant("b")],
            rounds: Some(1),
            mode: Mode::Quick,
            working_directory: dir.path().display().to_string(),
        };
        let result = engine.execute(request).await.unwrap();
        let a_response = result.full_debate.iter().find(|r| r.participant == "a").unwrap();
        assert!(a_response.text.contains("Working directory layout"));
        assert!(a_response.text.contains("lib.rs"));

        let mut disabled_config = DeliberationConfig::default();
        disabled_config.file_tree.enabled = false;
        let engine = DeliberationEngine::new(adapters, None, None, None, disabled_config);
        let request = DeliberateRequest {
            question: "Should we restructure this directory?".into(),
            participants: vec![participant("a"), participant("b")],
            rounds: Some(1),
            mode: Mode::Quick,
            working_directory: dir.path().display().to_string(),
        };
        let result = engine.execute(request).await.unwrap();
        let a_response = result.full_debate.iter().find(|r| r.participant == "a").unwrap();
        assert!(!a_response.text.contains("Working directory layout"));
    }
}
