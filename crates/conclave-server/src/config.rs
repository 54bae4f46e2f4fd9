//! Deliberation-side configuration: round limits, early stopping,
//! convergence thresholds, file-tree injection, and tool-context pruning.
//! Mirrors the `deliberation.*` namespace. Also hosts [`Config`], the root
//! TOML-loaded struct nesting this section alongside `decision_graph.*`.

use std::path::Path;

use serde::{Deserialize, Serialize};

use conclave_core::{ConfigError, DecisionGraphConfig};

use crate::convergence::ConvergenceConfig as EngineConvergenceConfig;
use crate::tool_exec::ToolSecurityConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EarlyStoppingConfig {
    pub enabled: bool,
    pub threshold: f64,
    pub respect_min_rounds: bool,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 2.0 / 3.0,
            respect_min_rounds: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileTreeConfig {
    pub enabled: bool,
    pub max_depth: usize,
    pub max_files: usize,
}

impl Default for FileTreeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 3,
            max_files: 200,
        }
    }
}

impl FileTreeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10).contains(&self.max_depth) {
            return Err(ConfigError::OutOfRange {
                field: "file_tree.max_depth",
                value: self.max_depth as f64,
                min: 1.0,
                max: 10.0,
            });
        }
        if !(10..=1000).contains(&self.max_files) {
            return Err(ConfigError::OutOfRange {
                field: "file_tree.max_files",
                value: self.max_files as f64,
                min: 10.0,
                max: 1000.0,
            });
        }
        Ok(())
    }
}

/// First adapter/model pair available from this ordered list generates the
/// end-of-deliberation summary.
pub fn default_summarizer_chain() -> Vec<(String, String, String)> {
    vec![
        ("claude".into(), "sonnet".into(), "Claude Sonnet".into()),
        ("codex".into(), "gpt-5-codex".into(), "GPT-5 Codex".into()),
        ("droid".into(), "claude-sonnet-4-5-20250929".into(), "Droid with Claude Sonnet".into()),
        ("gemini".into(), "gemini-2.5-pro".into(), "Gemini 2.5 Pro".into()),
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliberationConfig {
    pub max_rounds: u32,
    pub min_rounds: u32,
    pub early_stopping: EarlyStoppingConfig,
    pub convergence_threshold: f64,
    pub divergence_floor: f64,
    pub stable_rounds: usize,
    pub file_tree: FileTreeConfig,
    pub tool_context_max_rounds: u32,
    pub tool_output_max_chars: usize,
    #[serde(skip)]
    pub tool_security: ToolSecurityConfig,
    pub response_budget_chars: usize,
}

impl Default for DeliberationConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            min_rounds: 1,
            early_stopping: EarlyStoppingConfig::default(),
            convergence_threshold: 0.85,
            divergence_floor: 0.30,
            stable_rounds: 2,
            file_tree: FileTreeConfig::default(),
            tool_context_max_rounds: 2,
            tool_output_max_chars: 1000,
            tool_security: ToolSecurityConfig::default(),
            response_budget_chars: 20_000,
        }
    }
}

impl DeliberationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.file_tree.validate()?;
        if !(1..=5).contains(&self.max_rounds) {
            return Err(ConfigError::OutOfRange {
                field: "max_rounds",
                value: self.max_rounds as f64,
                min: 1.0,
                max: 5.0,
            });
        }
        Ok(())
    }

    pub fn engine_convergence_config(&self) -> EngineConvergenceConfig {
        EngineConvergenceConfig {
            convergence_threshold: self.convergence_threshold,
            divergence_floor: self.divergence_floor,
            stable_rounds: self.stable_rounds,
        }
    }
}

/// Root configuration, loaded from a TOML file. Nests the `decision_graph.*`
/// and `deliberation.*` namespaces from the external-interfaces table.
/// Any validation failure here is a fatal startup error, not a degraded
/// default — following the teacher's startup-validates-and-exits idiom.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub decision_graph: DecisionGraphConfig,
    pub deliberation: DeliberationConfig,
}

impl Config {
    /// Loads and validates configuration from `path`. Missing file is not
    /// itself fatal; the caller decides whether to fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Invalid(format!("cannot read config file {}: {e}", path.display())))?;
        let config: Config = toml::from_str(&raw).map_err(|e| ConfigError::Invalid(format!("invalid config TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.decision_graph.validate()?;
        self.deliberation.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod root_config_tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn loads_from_toml_and_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conclave.toml");
        std::fs::write(
            &path,
            r#"
            [decision_graph]
            context_token_budget = 2000

            [deliberation]
            max_rounds = 3
            "#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.decision_graph.context_token_budget, 2000);
        assert_eq!(config.deliberation.max_rounds, 3);
    }
}
