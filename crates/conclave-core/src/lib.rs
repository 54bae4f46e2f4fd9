//! Decision graph core: persistence, similarity scoring, retrieval, caching
//! and background edge computation for a long-lived memory of past
//! deliberations.

pub mod cache;
pub mod config;
pub mod error;
pub mod integration;
pub mod retriever;
pub mod similarity;
pub mod storage;
pub mod types;
pub mod worker;

pub use config::DecisionGraphConfig;
pub use error::{ConfigError, StorageError, WorkerError};
pub use integration::{DeliberationOutcome, GraphIntegration, GraphMetrics, HealthReport};
pub use storage::Storage;
pub use types::{ConvergenceStatus, DecisionNode, DecisionSimilarity, ParticipantStance, SimilarityMatch};
