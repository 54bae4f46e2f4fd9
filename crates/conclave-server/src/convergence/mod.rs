//! Round-over-round convergence detection (C9, convergence half): compares
//! each participant's response to its own previous-round response and
//! reports when the deliberation has stabilized.

use std::collections::HashMap;

use conclave_core::similarity::SimilarityBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvergenceStatus {
    Converged,
    Impasse,
    Diverging,
    Refining,
    MaxRounds,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct ConvergenceInfo {
    pub detected: bool,
    pub detection_round: Option<u32>,
    pub final_similarity: f64,
    pub status: ConvergenceStatus,
    pub per_participant_similarity: HashMap<String, f64>,
}

impl Default for ConvergenceInfo {
    fn default() -> Self {
        Self {
            detected: false,
            detection_round: None,
            final_similarity: 0.0,
            status: ConvergenceStatus::Unknown,
            per_participant_similarity: HashMap::new(),
        }
    }
}

pub struct ConvergenceConfig {
    pub convergence_threshold: f64,
    pub divergence_floor: f64,
    pub stable_rounds: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            convergence_threshold: 0.85,
            divergence_floor: 0.30,
            stable_rounds: 2,
        }
    }
}

/// Tracks per-round minimum similarity to determine whether the stability
/// window (`stable_rounds` consecutive rounds) has actually been met, not
/// just the latest round in isolation.
pub struct ConvergenceDetector {
    config: ConvergenceConfig,
    history: Vec<f64>,
}

impl ConvergenceDetector {
    pub fn new(config: ConvergenceConfig) -> Self {
        Self { config, history: Vec::new() }
    }

    /// `previous`/`current` are keyed by participant id, holding that
    /// participant's response text for the prior and current round.
    pub fn check_round(
        &mut self,
        backend: &dyn SimilarityBackend,
        round: u32,
        previous: &HashMap<String, String>,
        current: &HashMap<String, String>,
    ) -> ConvergenceInfo {
        let mut per_participant = HashMap::new();
        for (participant, current_text) in current {
            if let Some(previous_text) = previous.get(participant) {
                let score = backend.compute_similarity(previous_text, current_text);
                per_participant.insert(participant.clone(), score);
            }
        }

        let min_similarity = per_participant.values().cloned().fold(f64::INFINITY, f64::min);
        let min_similarity = if min_similarity.is_finite() { min_similarity } else { 0.0 };
        self.history.push(min_similarity);

        let stable_window = self.history.len() >= self.config.stable_rounds
            && self.history[self.history.len() - self.config.stable_rounds..]
                .windows(2)
                .all(|w| (w[0] - w[1]).abs() < 0.1);

        let status = if stable_window && min_similarity >= self.config.convergence_threshold {
            ConvergenceStatus::Converged
        } else if stable_window && min_similarity >= self.config.divergence_floor {
            ConvergenceStatus::Impasse
        } else if self.history.len() >= 2 && min_similarity < self.history[self.history.len() - 2] {
            ConvergenceStatus::Diverging
        } else {
            ConvergenceStatus::Refining
        };

        let detected = matches!(status, ConvergenceStatus::Converged | ConvergenceStatus::Impasse);

        ConvergenceInfo {
            detected,
            detection_round: detected.then_some(round),
            final_similarity: min_similarity,
            status,
            per_participant_similarity: per_participant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::similarity::JaccardBackend;

    #[test]
    fn identical_responses_converge_after_stable_window() {
        let mut detector = ConvergenceDetector::new(ConvergenceConfig::default());
        let backend = JaccardBackend;
        let mut previous = HashMap::new();
        previous.insert("a@x".to_string(), "we should ship the release now".to_string());
        let mut current = previous.clone();

        let info1 = detector.check_round(&backend, 2, &previous, &current);
        let info2 = detector.check_round(&backend, 3, &previous, &current);
        assert!(info2.final_similarity >= info1.final_similarity - 1e-9);
        assert_eq!(info2.status, ConvergenceStatus::Converged);
    }
}
