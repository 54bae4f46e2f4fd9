//! Scenario-level integration tests driving the full stack — adapters,
//! orchestrator, and decision graph — together. Unit-level properties
//! (option grouping, convergence math, tiered formatting) are colocated
//! with the code they test; this file covers what only shows up when the
//! pieces run together.

use std::collections::HashMap;
use std::sync::Arc;

use conclave_core::{ConvergenceStatus, DecisionGraphConfig, DeliberationOutcome, GraphIntegration, Storage};
use conclave_server::adapter::{AdapterRegistry, EchoAdapter, FlakyAdapter};
use conclave_server::config::DeliberationConfig;
use conclave_server::orchestrator::{DeliberateRequest, DeliberationEngine, Mode, ParticipantSpec};

fn participant(id: &str) -> ParticipantSpec {
    ParticipantSpec {
        id: id.to_string(),
        adapter: id.to_string(),
        model: "test-model".to_string(),
    }
}

fn graph_with_queue_size(max_queue_size: usize) -> GraphIntegration {
    let storage = Arc::new(Storage::open_in_memory().unwrap());
    let config = DecisionGraphConfig {
        worker_max_queue_size: max_queue_size,
        ..DecisionGraphConfig::default()
    };
    GraphIntegration::new(storage, config)
}

fn outcome(participants: &[&str], winning_option: Option<&str>, consensus: &str, status: ConvergenceStatus) -> DeliberationOutcome {
    let mut final_positions = HashMap::new();
    for p in participants {
        final_positions.insert(p.to_string(), format!("{p}'s final position"));
    }
    DeliberationOutcome {
        participants: participants.iter().map(|s| s.to_string()).collect(),
        consensus: consensus.to_string(),
        winning_option: winning_option.map(|s| s.to_string()),
        convergence_status: status,
        transcript_path: String::new(),
        metadata: HashMap::new(),
        final_positions,
        votes: HashMap::new(),
    }
}

/// E1: a fresh store returns no context, and a first deliberation persists
/// a node plus one stance per participant with no similarity edges yet.
#[tokio::test]
async fn e1_empty_graph_persists_first_deliberation_without_edges() {
    let graph = graph_with_queue_size(1000);

    assert_eq!(graph.get_context_for_deliberation("Any question?"), "");

    let id = graph
        .store_deliberation(
            "Should we migrate the primary database to PostgreSQL?",
            outcome(&["A@x", "B@y"], None, "No agreement reached", ConvergenceStatus::Converged),
        )
        .await
        .unwrap();

    assert_eq!(graph.storage().count_nodes().unwrap(), 1);
    assert_eq!(graph.storage().list_stances(&id).unwrap().len(), 2);
    assert!(graph.storage().list_similar(&id, 0.0, 10).unwrap().is_empty());
}

/// E2: after a second, textually overlapping deliberation is stored, the
/// *next* context lookup surfaces the first one under the similar-past
/// section.
#[tokio::test]
async fn e2_second_deliberation_retrieves_prior_context() {
    let graph = graph_with_queue_size(1000);

    graph
        .store_deliberation(
            "Should we migrate the primary database to PostgreSQL?",
            outcome(&["A@x", "B@y"], Some("Yes, migrate"), "Team agreed to migrate", ConvergenceStatus::UnanimousConsensus),
        )
        .await
        .unwrap();

    graph
        .store_deliberation(
            "Should we migrate the analytics database to PostgreSQL too?",
            outcome(&["A@x", "B@y"], Some("Yes, migrate"), "Team agreed to migrate", ConvergenceStatus::UnanimousConsensus),
        )
        .await
        .unwrap();

    let context = graph.get_context_for_deliberation("Should we migrate the analytics database to PostgreSQL too?");
    assert!(!context.is_empty());
    assert!(context.contains("Similar Past Deliberations"));
    assert!(context.contains("Yes, migrate") || context.contains("Team agreed to migrate"));
}

/// E6: a deliberately tiny worker queue still ends up with persisted
/// similarity edges — either the worker drains in time or the facade's
/// synchronous fallback does the scoring instead. Which path ran isn't
/// asserted, only that the graph never silently drops edges under load.
#[tokio::test]
async fn e6_small_worker_queue_still_yields_similarity_edges() {
    let graph = graph_with_queue_size(1);

    let first_id = graph
        .store_deliberation(
            "Should the team adopt trunk-based development?",
            outcome(&["A@x", "B@y"], Some("Yes"), "Adopt trunk-based development", ConvergenceStatus::UnanimousConsensus),
        )
        .await
        .unwrap();

    let second_id = graph
        .store_deliberation(
            "Should the team adopt trunk-based development for all repos?",
            outcome(&["A@x", "B@y"], Some("Yes"), "Adopt trunk-based development", ConvergenceStatus::UnanimousConsensus),
        )
        .await
        .unwrap();

    // Give the background worker a chance to drain if it won the race.
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;

    let edges_from_second = graph.storage().list_similar(&second_id, 0.0, 10).unwrap();
    let edges_from_first = graph.storage().list_similar(&first_id, 0.0, 10).unwrap();
    assert!(!edges_from_second.is_empty() || !edges_from_first.is_empty());
}

/// E7: one participant's adapter fails in round 1; the round still
/// completes with an error marker in that participant's slot and the
/// other participant's response intact.
#[tokio::test]
async fn e7_adapter_failure_is_isolated_to_one_participant() {
    let mut adapters: AdapterRegistry = HashMap::new();
    adapters.insert("a".into(), Arc::new(FlakyAdapter::new(Box::new(EchoAdapter::new("a", "response A")), [0])));
    adapters.insert("b".into(), Arc::new(EchoAdapter::new("b", "response B")));
    let engine = DeliberationEngine::new(adapters, None, None, None, DeliberationConfig::default());

    let request = DeliberateRequest {
        question: "Should we roll back last night's deploy?".into(),
        participants: vec![participant("a"), participant("b")],
        rounds: Some(1),
        mode: Mode::Quick,
        working_directory: ".".into(),
    };
    let result = engine.execute(request).await.unwrap();

    assert_eq!(result.status, "complete");
    assert!(result.rounds_completed >= 1);
    let a_response = result.full_debate.iter().find(|r| r.participant == "a").unwrap();
    assert!(a_response.text.contains("[ERROR:"));
    let b_response = result.full_debate.iter().find(|r| r.participant == "b").unwrap();
    assert_eq!(b_response.text, "response B");
}

/// P8: once both participants vote to stop, no further round's adapter
/// calls happen — the transcript has exactly one entry per participant,
/// not one per (participant, configured round).
#[tokio::test]
async fn p8_early_stop_prevents_any_further_round() {
    let vote_template = r#"{prompt} VOTE: {"option": "Yes", "confidence": 0.9, "continue_debate": false}"#;
    let mut adapters: AdapterRegistry = HashMap::new();
    adapters.insert("a".into(), Arc::new(EchoAdapter::new("a", vote_template)));
    adapters.insert("b".into(), Arc::new(EchoAdapter::new("b", vote_template)));
    let engine = DeliberationEngine::new(adapters, None, None, None, DeliberationConfig::default());

    let request = DeliberateRequest {
        question: "Should we pin the dependency to the last known-good version?".into(),
        participants: vec![participant("a"), participant("b")],
        rounds: Some(5),
        mode: Mode::Conference,
        working_directory: ".".into(),
    };
    let result = engine.execute(request).await.unwrap();

    assert_eq!(result.rounds_completed, 1);
    assert_eq!(result.full_debate.len(), 2);
}

/// P9: tool invocations are recorded only for rounds that actually ran.
/// With early stopping cutting the debate short, no tool-history entry
/// should reference a round past what completed.
#[tokio::test]
async fn p9_tool_history_never_outruns_rounds_completed() {
    use conclave_server::tool_exec::{ToolExecutor, ToolSecurityConfig};

    let vote_template = r#"Checking the tree first. TOOL_REQUEST: {"name": "list_files", "arguments": {"pattern": "*"}}
{prompt} VOTE: {"option": "Yes", "confidence": 0.9, "continue_debate": false}"#;
    let mut adapters: AdapterRegistry = HashMap::new();
    adapters.insert("a".into(), Arc::new(EchoAdapter::new("a", vote_template)));
    adapters.insert("b".into(), Arc::new(EchoAdapter::new("b", vote_template)));
    let tool_executor = ToolExecutor::new(ToolSecurityConfig::default());
    let engine = DeliberationEngine::new(adapters, None, Some(tool_executor), None, DeliberationConfig::default());

    let working_directory = tempfile::tempdir().unwrap();
    let request = DeliberateRequest {
        question: "Should we restructure the crate layout before the next release?".into(),
        participants: vec![participant("a"), participant("b")],
        rounds: Some(5),
        mode: Mode::Conference,
        working_directory: working_directory.path().display().to_string(),
    };
    let result = engine.execute(request).await.unwrap();

    assert_eq!(result.rounds_completed, 1);
    assert!(!result.tool_execution_history.is_empty());
    assert!(result.tool_execution_history.iter().all(|r| r.round <= result.rounds_completed));
}
