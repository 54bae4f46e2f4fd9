//! Thin process entry point: loads configuration, wires up storage, the
//! decision graph, a registry of reference adapters, and the tool executor,
//! then serves `DeliberationService` over a line-delimited JSON-lines loop
//! on stdio. The outer transport is a demo harness, not a claim that stdio
//! JSON-lines is the production wire protocol — see the service boundary
//! contract in `protocol`/`service` for the actual interface.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use conclave_core::{GraphIntegration, Storage};
use conclave_server::protocol::{ErrorResponse, WireRequest};
use conclave_server::service::DeliberationService;
use conclave_server::tool_exec::ToolExecutor;
use conclave_server::{adapter::AdapterRegistry, Config};

#[derive(Parser, Debug)]
#[command(name = "conclave-server", version, about = "Multi-model deliberation server")]
struct Cli {
    /// Path to a TOML config file. Defaults to built-in values when absent.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> Config {
    match &cli.config {
        Some(path) => match Config::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("error: invalid configuration at {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    }
}

fn build_graph(config: &Config) -> Option<Arc<GraphIntegration>> {
    if !config.decision_graph.enabled {
        return None;
    }
    let db_path = match config.decision_graph.resolve_db_path() {
        Ok(path) => path,
        Err(e) => {
            error!("failed to resolve decision graph db path: {e}");
            std::process::exit(1);
        }
    };
    match Storage::open(&db_path) {
        Ok(storage) => {
            let graph = Arc::new(GraphIntegration::new(Arc::new(storage), config.decision_graph.clone()));
            graph.ensure_worker_started();
            Some(graph)
        }
        Err(e) => {
            error!("failed to open decision graph storage at {}: {e}", db_path.display());
            std::process::exit(1);
        }
    }
}

/// Reference adapters only: production model backends are out of scope here
/// (see the adapter contract in `conclave_server::adapter`). This registry
/// exists so the binary is runnable end-to-end against deterministic
/// responses.
fn build_adapters() -> AdapterRegistry {
    use conclave_server::adapter::EchoAdapter;
    let mut adapters: AdapterRegistry = AdapterRegistry::new();
    adapters.insert("echo".into(), Arc::new(EchoAdapter::new("echo", "Acknowledged: {prompt}")));
    adapters
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(io::stderr)
        .with_target(false)
        .with_ansi(false)
        .init();

    info!("conclave-server v{} starting", env!("CARGO_PKG_VERSION"));

    let config = load_config(&cli);
    let graph = build_graph(&config);
    let adapters = build_adapters();
    let tool_executor = Some(ToolExecutor::new(config.deliberation.tool_security.clone()));
    // Standalone backend for round-to-round convergence scoring; it has no
    // retrieval query cache to share, so it gets its own embedding cache (or
    // none, outside the `embeddings` feature).
    let similarity_backend = Some(conclave_core::similarity::select_backend(None));

    let service = DeliberationService::new(adapters, graph.clone(), tool_executor, similarity_backend, config.deliberation.clone());

    info!("serving DeliberationService over stdio JSON-lines");
    run_stdio_loop(&service).await;

    if let Some(graph) = graph {
        graph.shutdown(std::time::Duration::from_secs(5)).await;
    }
    info!("conclave-server shutting down");
}

async fn run_stdio_loop(service: &DeliberationService) {
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut stdout = stdout.lock();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(l) => l,
            Err(e) => {
                error!("failed to read line from stdin: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response_json = match serde_json::from_str::<WireRequest>(&line) {
            Ok(request) => dispatch(service, request).await,
            Err(e) => {
                warn!("failed to parse request line: {e}");
                serde_json::to_string(&ErrorResponse::new("ParseError", e.to_string())).unwrap_or_default()
            }
        };

        if let Err(e) = writeln!(stdout, "{response_json}").and_then(|_| stdout.flush()) {
            error!("failed to write response: {e}");
            break;
        }
    }
}

async fn dispatch(service: &DeliberationService, request: WireRequest) -> String {
    match request {
        WireRequest::Deliberate(req) => match service.deliberate(req).await {
            Ok(resp) => serde_json::to_string(&resp),
            Err(err) => serde_json::to_string(&err),
        },
        WireRequest::QueryDecisions(req) => match service.query_decisions(req).await {
            Ok(resp) => serde_json::to_string(&resp),
            Err(err) => serde_json::to_string(&err),
        },
        WireRequest::ListModels(req) => serde_json::to_string(&service.list_models(req).await),
        WireRequest::SetSessionModels(req) => serde_json::to_string(&service.set_session_models(req).await),
    }
    .unwrap_or_else(|e| format!(r#"{{"error":"failed to serialize response: {e}","error_type":"InternalError","status":"failed"}}"#))
}
