//! [`DeliberationService`]: the boundary contract itself. Plain async
//! methods an embedder calls directly, or that a thin transport (see
//! `main.rs`) wraps over stdio/HTTP/JSON-RPC.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use conclave_core::GraphIntegration;

use crate::adapter::AdapterRegistry;
use crate::config::DeliberationConfig;
use crate::orchestrator::{DeliberateRequest, DeliberationEngine, OrchestratorError, ParticipantSpec};
use crate::protocol::{
    mode_from_wire, to_wire_response, DeliberateWireRequest, DeliberateWireResponse, DecisionSummary,
    ErrorResponse, ListModelsRequest, ListModelsResponse, QueryDecisionsResponse, QueryDecisionsWireRequest,
    QuerySelector, SetSessionModelsRequest, SetSessionModelsResponse,
};
use conclave_core::similarity::SimilarityBackend;
use crate::tool_exec::ToolExecutor;

const DEFAULT_QUERY_LIMIT: usize = 10;

fn parse_participant(raw: &str, session_models: &HashMap<String, String>) -> Result<ParticipantSpec, String> {
    let (model_part, adapter) = raw
        .split_once('@')
        .ok_or_else(|| format!("participant '{raw}' must be of the form <model>@<backend>"))?;
    if adapter.is_empty() {
        return Err(format!("participant '{raw}' has an empty backend name"));
    }
    let model = if model_part.is_empty() || model_part == "default" {
        session_models.get(adapter).cloned().unwrap_or_else(|| model_part.to_string())
    } else {
        model_part.to_string()
    };
    Ok(ParticipantSpec { id: raw.to_string(), adapter: adapter.to_string(), model })
}

pub struct DeliberationService {
    engine: DeliberationEngine,
    adapters: AdapterRegistry,
    graph: Option<Arc<GraphIntegration>>,
    session_models: Mutex<HashMap<String, String>>,
    response_budget_chars: usize,
}

impl DeliberationService {
    pub fn new(
        adapters: AdapterRegistry,
        graph: Option<Arc<GraphIntegration>>,
        tool_executor: Option<ToolExecutor>,
        similarity_backend: Option<Arc<dyn SimilarityBackend>>,
        config: DeliberationConfig,
    ) -> Self {
        let response_budget_chars = config.response_budget_chars;
        let engine = DeliberationEngine::new(adapters.clone(), graph.clone(), tool_executor, similarity_backend, config);
        Self {
            engine,
            adapters,
            graph,
            session_models: Mutex::new(HashMap::new()),
            response_budget_chars,
        }
    }

    pub async fn deliberate(&self, request: DeliberateWireRequest) -> Result<DeliberateWireResponse, ErrorResponse> {
        let mode = mode_from_wire(request.mode.as_deref()).map_err(|e| ErrorResponse::new("InvalidRequest", e))?;

        let session_models = self.session_models.lock().unwrap().clone();
        let mut participants = Vec::with_capacity(request.participants.len());
        for raw in &request.participants {
            participants.push(parse_participant(raw, &session_models).map_err(|e| ErrorResponse::new("InvalidRequest", e))?);
        }

        if let Some(rounds) = request.rounds {
            if !(1..=5).contains(&rounds) {
                return Err(ErrorResponse::new("InvalidRequest", "rounds must be in [1, 5]"));
            }
        }

        let engine_request = DeliberateRequest {
            question: request.question,
            participants,
            rounds: request.rounds,
            mode,
            working_directory: request.working_directory,
        };

        match self.engine.execute(engine_request).await {
            Ok(result) => Ok(to_wire_response(result, self.response_budget_chars)),
            Err(OrchestratorError::InvalidRequest(msg)) => Err(ErrorResponse::new("InvalidRequest", msg)),
            Err(OrchestratorError::Storage(e)) => Err(ErrorResponse::new("StorageError", e.to_string())),
        }
    }

    pub async fn query_decisions(&self, request: QueryDecisionsWireRequest) -> Result<QueryDecisionsResponse, ErrorResponse> {
        let Some(graph) = &self.graph else {
            return Err(ErrorResponse::new("DecisionGraphDisabled", "the decision graph is not enabled"));
        };
        let selector = QuerySelector::try_from(&request).map_err(|e| ErrorResponse::new("InvalidRequest", e.to_string()))?;
        let limit = request.limit.unwrap_or(DEFAULT_QUERY_LIMIT);

        let results = match selector {
            QuerySelector::Text(text) => graph
                .retriever()
                .find_relevant(&text)
                .into_iter()
                .take(limit)
                .map(|m| DecisionSummary {
                    id: m.node.id,
                    question: m.node.question,
                    consensus: m.node.consensus,
                    winning_option: m.node.winning_option,
                    convergence_status: m.node.convergence_status.to_string(),
                    participants: m.node.participants,
                    score: Some(m.score),
                })
                .collect(),
            QuerySelector::DecisionId(id) => match graph.storage().get_node(&id) {
                Ok(Some(node)) => vec![DecisionSummary {
                    id: node.id,
                    question: node.question,
                    consensus: node.consensus,
                    winning_option: node.winning_option,
                    convergence_status: node.convergence_status.to_string(),
                    participants: node.participants,
                    score: None,
                }],
                Ok(None) => Vec::new(),
                Err(e) => return Err(ErrorResponse::new("StorageError", e.to_string())),
            },
            QuerySelector::FindContradictions => self.find_contradictions(limit)?,
        };

        Ok(QueryDecisionsResponse { results })
    }

    /// Scans recent decisions for pairs that are highly similar (a recorded
    /// similarity edge above the default threshold) yet landed on different
    /// winning options — a proxy for "these two debates reached conflicting
    /// conclusions about the same underlying question".
    fn find_contradictions(&self, limit: usize) -> Result<Vec<DecisionSummary>, ErrorResponse> {
        let Some(graph) = &self.graph else {
            return Ok(Vec::new());
        };
        let storage = graph.storage();
        let recent = storage.list_nodes(200, 0).map_err(|e| ErrorResponse::new("StorageError", e.to_string()))?;

        let mut contradictions = Vec::new();
        for node in &recent {
            if node.winning_option.is_none() {
                continue;
            }
            let similar = storage
                .list_similar(&node.id, 0.70, 5)
                .map_err(|e| ErrorResponse::new("StorageError", e.to_string()))?;
            for (other, score) in similar {
                if other.winning_option.is_some() && other.winning_option != node.winning_option {
                    contradictions.push(DecisionSummary {
                        id: node.id.clone(),
                        question: node.question.clone(),
                        consensus: format!("Conflicts with '{}' (similarity {:.2}): {}", other.question, score, other.consensus),
                        winning_option: node.winning_option.clone(),
                        convergence_status: node.convergence_status.to_string(),
                        participants: node.participants.clone(),
                        score: Some(score),
                    });
                    if contradictions.len() >= limit {
                        return Ok(contradictions);
                    }
                }
            }
        }
        Ok(contradictions)
    }

    pub async fn list_models(&self, request: ListModelsRequest) -> ListModelsResponse {
        let models: Vec<String> = match request.adapter {
            Some(adapter) => self
                .adapters
                .contains_key(&adapter)
                .then(|| vec![adapter])
                .unwrap_or_default(),
            None => self.adapters.keys().cloned().collect(),
        };
        ListModelsResponse { models }
    }

    pub async fn set_session_models(&self, request: SetSessionModelsRequest) -> SetSessionModelsResponse {
        let mut session_models = self.session_models.lock().unwrap();
        let mut applied = HashMap::new();
        for (adapter, model) in request.selections {
            match model {
                Some(model) => {
                    session_models.insert(adapter.clone(), model.clone());
                    applied.insert(adapter, Some(model));
                }
                None => {
                    session_models.remove(&adapter);
                    applied.insert(adapter, None);
                }
            }
        }
        SetSessionModelsResponse { applied }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::EchoAdapter;

    fn service() -> DeliberationService {
        let mut adapters: AdapterRegistry = HashMap::new();
        adapters.insert("a".into(), Arc::new(EchoAdapter::new("a", "response A")));
        adapters.insert("b".into(), Arc::new(EchoAdapter::new("b", "response B")));
        DeliberationService::new(adapters, None, None, None, DeliberationConfig::default())
    }

    #[tokio::test]
    async fn deliberate_rejects_short_question() {
        let service = service();
        let request = DeliberateWireRequest {
            question: "too short".into(),
            participants: vec!["sonnet@a".into(), "gpt@b".into()],
            rounds: Some(1),
            mode: Some("quick".into()),
            working_directory: ".".into(),
        };
        let err = service.deliberate(request).await.unwrap_err();
        assert_eq!(err.error_type, "InvalidRequest");
    }

    #[tokio::test]
    async fn deliberate_rejects_malformed_participant() {
        let service = service();
        let request = DeliberateWireRequest {
            question: "Should we ship the release this week?".into(),
            participants: vec!["no-at-sign".into(), "gpt@b".into()],
            rounds: Some(1),
            mode: Some("quick".into()),
            working_directory: ".".into(),
        };
        let err = service.deliberate(request).await.unwrap_err();
        assert_eq!(err.error_type, "InvalidRequest");
    }

    #[tokio::test]
    async fn deliberate_succeeds_with_valid_request() {
        let service = service();
        let request = DeliberateWireRequest {
            question: "Should we ship the release this week?".into(),
            participants: vec!["sonnet@a".into(), "gpt@b".into()],
            rounds: Some(1),
            mode: Some("quick".into()),
            working_directory: ".".into(),
        };
        let response = service.deliberate(request).await.unwrap();
        assert_eq!(response.status, "complete");
        assert_eq!(response.rounds_completed, 1);
    }

    #[tokio::test]
    async fn list_models_filters_by_adapter() {
        let service = service();
        let all = service.list_models(ListModelsRequest { adapter: None }).await;
        assert_eq!(all.models.len(), 2);
        let one = service.list_models(ListModelsRequest { adapter: Some("a".into()) }).await;
        assert_eq!(one.models, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn set_session_models_overrides_default_model() {
        let service = service();
        let mut selections = HashMap::new();
        selections.insert("a".to_string(), Some("custom-model".to_string()));
        let applied = service.set_session_models(SetSessionModelsRequest { selections }).await;
        assert_eq!(applied.applied.get("a"), Some(&Some("custom-model".to_string())));
    }
}
