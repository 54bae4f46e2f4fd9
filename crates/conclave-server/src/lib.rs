//! Deliberation orchestration surface: model-adapter contract, tool
//! execution, vote/convergence engine, round-based orchestrator, and the
//! `DeliberationService` boundary contract wrapping it all. Depends on
//! `conclave-core` for persistence and retrieval; has no knowledge of a
//! concrete wire transport.

pub mod adapter;
pub mod config;
pub mod convergence;
pub mod orchestrator;
pub mod protocol;
pub mod service;
pub mod tool_exec;
pub mod vote;

pub use config::{Config, DeliberationConfig};
pub use orchestrator::{DeliberateRequest, DeliberationEngine, DeliberationResult, Mode, OrchestratorError, ParticipantSpec};
pub use service::DeliberationService;
