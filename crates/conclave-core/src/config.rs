//! Configuration for the decision graph: storage location, retrieval tuning,
//! cache sizing and background-worker behavior.
//!
//! Mirrors the `decision_graph.*` namespace. Loaded as part of the larger
//! server configuration and validated once at startup; any failure here is
//! fatal (error kind 4 in the design document).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Similarity-band thresholds used by the tiered context formatter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierBoundaries {
    pub strong: f64,
    pub moderate: f64,
}

impl Default for TierBoundaries {
    fn default() -> Self {
        Self {
            strong: 0.75,
            moderate: 0.60,
        }
    }
}

impl TierBoundaries {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.strong > self.moderate && self.moderate > 0.0) {
            return Err(ConfigError::InvalidTierOrdering {
                strong: self.strong,
                moderate: self.moderate,
            });
        }
        if self.strong > 1.0 || self.moderate > 1.0 {
            return Err(ConfigError::OutOfRange {
                field: "tier_boundaries",
                value: self.strong.max(self.moderate),
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(())
    }
}

/// Thresholds controlling how many candidates the retriever returns as the
/// graph grows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveKConfig {
    pub small_threshold: usize,
    pub medium_threshold: usize,
    pub small_k: usize,
    pub medium_k: usize,
    pub large_k: usize,
}

impl Default for AdaptiveKConfig {
    fn default() -> Self {
        Self {
            small_threshold: 100,
            medium_threshold: 1000,
            small_k: 5,
            medium_k: 3,
            large_k: 2,
        }
    }
}

impl AdaptiveKConfig {
    /// `n < small_threshold -> small_k`, `< medium_threshold -> medium_k`, else `large_k`.
    pub fn k_for(&self, n: usize) -> usize {
        if n < self.small_threshold {
            self.small_k
        } else if n < self.medium_threshold {
            self.medium_k
        } else {
            self.large_k
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionGraphConfig {
    pub enabled: bool,
    pub db_path: PathBuf,
    pub context_token_budget: usize,
    pub tier_boundaries: TierBoundaries,
    pub query_window: usize,
    pub noise_floor: f64,
    pub adaptive_k: AdaptiveKConfig,
    pub query_cache_size: usize,
    pub embedding_cache_size: usize,
    pub query_ttl_secs: u64,
    pub similarity_threshold: f64,
    pub worker_batch_size: usize,
    pub worker_max_queue_size: usize,
    pub synchronous_fallback_limit: usize,
}

impl Default for DecisionGraphConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            db_path: PathBuf::from("decision_graph.db"),
            context_token_budget: 2000,
            tier_boundaries: TierBoundaries::default(),
            query_window: 1000,
            noise_floor: 0.40,
            adaptive_k: AdaptiveKConfig::default(),
            query_cache_size: 200,
            embedding_cache_size: 500,
            query_ttl_secs: 300,
            similarity_threshold: 0.5,
            worker_batch_size: 50,
            worker_max_queue_size: 1000,
            synchronous_fallback_limit: 100,
        }
    }
}

impl DecisionGraphConfig {
    /// Resolves `${VAR}`-style placeholders in `db_path` against the process
    /// environment, failing fast when a referenced variable is unset.
    pub fn resolve_db_path(&self) -> Result<PathBuf, ConfigError> {
        let raw = self.db_path.to_string_lossy().to_string();
        let resolved = substitute_env_vars(&raw)?;
        Ok(PathBuf::from(resolved))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tier_boundaries.validate()?;
        if !(500..=10_000).contains(&self.context_token_budget) {
            return Err(ConfigError::OutOfRange {
                field: "context_token_budget",
                value: self.context_token_budget as f64,
                min: 500.0,
                max: 10_000.0,
            });
        }
        if !(50..=10_000).contains(&self.query_window) {
            return Err(ConfigError::OutOfRange {
                field: "query_window",
                value: self.query_window as f64,
                min: 50.0,
                max: 10_000.0,
            });
        }
        self.resolve_db_path()?;
        Ok(())
    }
}

/// Substitutes `${VAR}` occurrences in `input` with the corresponding
/// environment variable. Missing variables are a fatal config error.
pub fn substitute_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| ConfigError::Invalid(format!("unterminated placeholder in {input}")))?;
        let var_name = &after[..end];
        let value = std::env::var(var_name)
            .map_err(|_| ConfigError::MissingEnvVar(var_name.to_string()))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_boundaries_validate_ordering() {
        let valid = TierBoundaries { strong: 0.75, moderate: 0.60 };
        assert!(valid.validate().is_ok());
        let invalid = TierBoundaries { strong: 0.5, moderate: 0.6 };
        assert!(invalid.validate().is_err());
    }

    #[test]
    fn adaptive_k_matches_spec_thresholds() {
        let cfg = AdaptiveKConfig::default();
        assert_eq!(cfg.k_for(10), 5);
        assert_eq!(cfg.k_for(500), 3);
        assert_eq!(cfg.k_for(5000), 2);
    }

    #[test]
    fn env_substitution_resolves_and_fails() {
        unsafe {
            std::env::set_var("CONCLAVE_TEST_DB_DIR", "/tmp/conclave");
        }
        assert_eq!(
            substitute_env_vars("${CONCLAVE_TEST_DB_DIR}/graph.db").unwrap(),
            "/tmp/conclave/graph.db"
        );
        assert!(substitute_env_vars("${CONCLAVE_TEST_DOES_NOT_EXIST}").is_err());
    }
}
