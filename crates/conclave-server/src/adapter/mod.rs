//! The model-adapter contract (C7): a single asynchronous `invoke`
//! operation every backend implements. Production connectors for concrete
//! CLIs/APIs are out of scope here; this module defines the contract plus
//! two reference adapters used to exercise the orchestrator in tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub prompt: String,
    pub model: String,
    pub context: Option<String>,
    pub is_deliberation: bool,
    pub working_directory: String,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("adapter timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("adapter runtime error: {message}")]
    Runtime { message: String },
}

/// The Rust equivalent of the original system's `f"[ERROR: {type}: {msg}]"`
/// marker substituted into a failed participant's response so the rest of
/// the round can proceed.
pub fn error_marker(error: &AdapterError) -> String {
    match error {
        AdapterError::Timeout { after } => format!("[ERROR: Timeout: adapter did not respond within {after:?}]"),
        AdapterError::Runtime { message } => format!("[ERROR: RuntimeError: {message}]"),
    }
}

#[async_trait]
pub trait ModelAdapter: Send + Sync {
    fn name(&self) -> &str;
    async fn invoke(&self, req: InvokeRequest) -> Result<String, AdapterError>;
}

/// Returns a deterministic, templated response. Useful for driving the
/// orchestrator end-to-end without any network calls.
pub struct EchoAdapter {
    name: String,
    response_template: String,
}

impl EchoAdapter {
    pub fn new(name: impl Into<String>, response_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            response_template: response_template.into(),
        }
    }
}

#[async_trait]
impl ModelAdapter for EchoAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, req: InvokeRequest) -> Result<String, AdapterError> {
        Ok(self.response_template.replace("{prompt}", &req.prompt))
    }
}

/// Returns a pre-programmed sequence of responses, one per call, repeating
/// the last entry once exhausted. Used to script convergence, divergence,
/// and vote scenarios deterministically in tests.
pub struct ScriptedAdapter {
    name: String,
    responses: Vec<String>,
    calls: std::sync::atomic::AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(name: impl Into<String>, responses: Vec<String>) -> Self {
        Self {
            name: name.into(),
            responses,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _req: InvokeRequest) -> Result<String, AdapterError> {
        let idx = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let response = self
            .responses
            .get(idx)
            .or_else(|| self.responses.last())
            .cloned()
            .unwrap_or_default();
        Ok(response)
    }
}

/// Returns an error on its first `fail_after`-th calls, then delegates to
/// `inner`. Used to exercise per-participant adapter-failure isolation.
pub struct FlakyAdapter {
    inner: Box<dyn ModelAdapter>,
    fail_calls: std::collections::HashSet<usize>,
    calls: std::sync::atomic::AtomicUsize,
}

impl FlakyAdapter {
    pub fn new(inner: Box<dyn ModelAdapter>, fail_on_calls: impl IntoIterator<Item = usize>) -> Self {
        Self {
            inner,
            fail_calls: fail_on_calls.into_iter().collect(),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ModelAdapter for FlakyAdapter {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, req: InvokeRequest) -> Result<String, AdapterError> {
        let idx = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        if self.fail_calls.contains(&idx) {
            return Err(AdapterError::Timeout { after: Duration::from_secs(30) });
        }
        self.inner.invoke(req).await
    }
}

pub type AdapterRegistry = HashMap<String, std::sync::Arc<dyn ModelAdapter>>;
