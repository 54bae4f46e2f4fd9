use thiserror::Error;

/// Errors surfaced by the persistence layer.
///
/// Reads of a missing row never error; only writes that violate an
/// integrity constraint or an underlying I/O failure reach this type.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Errors from the background similarity worker.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("queue at capacity")]
    QueueFull,

    #[error("invalid priority")]
    InvalidPriority,
}

/// Configuration validation failures. All are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid tier ordering: strong ({strong}) must be greater than moderate ({moderate}), and moderate must be greater than 0")]
    InvalidTierOrdering { strong: f64, moderate: f64 },

    #[error("{field} out of range: {value} (expected [{min}, {max}])")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}
