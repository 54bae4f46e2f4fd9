//! Vote parsing and option-grouping (C9, voting half).

use std::collections::HashMap;

use conclave_core::similarity::normalize_text;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

/// `VOTE:\s*(\{.+?\})`, dot-matches-newline, so a vote JSON object spanning
/// multiple lines still parses; tolerant of surrounding LaTeX `$\boxed{}$`
/// wrapping since only the literal marker and the JSON object are anchored.
static VOTE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)VOTE:\s*(\{.+?\})").unwrap());

#[derive(Debug, Clone, Deserialize)]
struct RawVote {
    option: String,
    confidence: f64,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    continue_debate: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct Vote {
    pub option: String,
    pub confidence: f64,
    pub rationale: String,
    pub continue_debate: Option<bool>,
}

/// Parses the last `VOTE:` marker in `text`. Malformed JSON or
/// out-of-range confidence yields `None` rather than a partial vote.
pub fn parse_vote(text: &str) -> Option<Vote> {
    let last_match = VOTE_RE.find_iter(text).last()?;
    let captures = VOTE_RE.captures(last_match.as_str())?;
    let json_str = captures.get(1)?.as_str();
    let raw: RawVote = serde_json::from_str(json_str).ok()?;
    if !(0.0..=1.0).contains(&raw.confidence) {
        return None;
    }
    Some(Vote {
        option: raw.option,
        confidence: raw.confidence,
        rationale: raw.rationale,
        continue_debate: raw.continue_debate,
    })
}

/// Options whose measured similarity is at or above this threshold are
/// fused under their first-seen canonical label. Fixed, not configurable:
/// the source system used both 0.70 and 0.85 in different places; 0.85 is
/// high enough to avoid merging semantically different options like
/// "Option A" and "Option D", whose measured similarity lands around 0.73.
pub const OPTION_GROUPING_THRESHOLD: f64 = 0.85;

/// Groups semantically-equivalent option labels (by exact match plus, when
/// a similarity backend is available, fuzzy matching at the fixed 0.85
/// threshold), summing raw tallies per group under the first-seen label.
pub fn group_similar_vote_options(
    backend: Option<&dyn conclave_core::similarity::SimilarityBackend>,
    raw_tally: &HashMap<String, u32>,
) -> HashMap<String, u32> {
    let Some(backend) = backend else {
        return raw_tally.clone();
    };

    // First-seen order matters for the canonical label; HashMap iteration
    // order doesn't preserve insertion, so sort by a stable key derived
    // from normalized text length as a deterministic tie-break when two
    // runs see the same options (acceptable: this only affects which
    // duplicate label is chosen as canonical, not the grouped counts).
    let mut options: Vec<&String> = raw_tally.keys().collect();
    options.sort();

    let mut canonical_for: HashMap<String, String> = HashMap::new();
    let mut canonicals: Vec<String> = Vec::new();

    for option in &options {
        let normalized = normalize_text(option);
        let mut matched: Option<String> = None;
        for canonical in &canonicals {
            if normalize_text(canonical) == normalized {
                matched = Some(canonical.clone());
                break;
            }
            let score = backend.compute_similarity(option, canonical);
            if score >= OPTION_GROUPING_THRESHOLD {
                matched = Some(canonical.clone());
                break;
            }
        }
        match matched {
            Some(canonical) => {
                canonical_for.insert((*option).clone(), canonical);
            }
            None => {
                canonicals.push((*option).clone());
                canonical_for.insert((*option).clone(), (*option).clone());
            }
        }
    }

    let mut grouped: HashMap<String, u32> = HashMap::new();
    for (option, count) in raw_tally {
        let canonical = canonical_for.get(option).cloned().unwrap_or_else(|| option.clone());
        *grouped.entry(canonical).or_insert(0) += count;
    }
    grouped
}

#[derive(Debug, Clone, Default)]
pub struct VotingResult {
    pub final_tally: HashMap<String, u32>,
    pub consensus_reached: bool,
    pub winning_option: Option<String>,
}

/// Aggregates `raw_votes` (participant -> parsed vote) into a grouped
/// tally and determines whether a unique winner exists.
pub fn aggregate_votes(
    backend: Option<&dyn conclave_core::similarity::SimilarityBackend>,
    raw_votes: &HashMap<String, Vote>,
) -> VotingResult {
    let mut raw_tally: HashMap<String, u32> = HashMap::new();
    for vote in raw_votes.values() {
        *raw_tally.entry(vote.option.clone()).or_insert(0) += 1;
    }
    let final_tally = group_similar_vote_options(backend, &raw_tally);

    let max_count = final_tally.values().copied().max();
    let winners: Vec<&String> = match max_count {
        Some(max) => final_tally.iter().filter(|&(_, &c)| c == max).map(|(k, _)| k).collect(),
        None => Vec::new(),
    };

    let winning_option = if winners.len() == 1 { winners.first().map(|s| s.to_string()) } else { None };
    let consensus_reached = winners.len() == 1 && max_count == Some(raw_votes.len() as u32);

    VotingResult {
        final_tally,
        consensus_reached,
        winning_option,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_vote_marker_wins() {
        let text = r#"Example: VOTE: {"option": "A", "confidence": 0.5}
Actual answer below.
VOTE: {"option": "B", "confidence": 0.9, "rationale": "because"}"#;
        let vote = parse_vote(text).unwrap();
        assert_eq!(vote.option, "B");
    }

    #[test]
    fn out_of_range_confidence_yields_no_vote() {
        let text = r#"VOTE: {"option": "A", "confidence": 1.5}"#;
        assert!(parse_vote(text).is_none());
    }

    #[test]
    fn malformed_json_yields_no_vote() {
        let text = "VOTE: {option: A}";
        assert!(parse_vote(text).is_none());
    }

    #[test]
    fn boxed_latex_wrapper_still_parses() {
        let text = r#"$\boxed{VOTE: {"option": "A", "confidence": 0.8}}$"#;
        assert_eq!(parse_vote(text).unwrap().option, "A");
    }

    #[test]
    fn distinct_options_below_threshold_never_merge() {
        let backend = conclave_core::similarity::JaccardBackend;
        let mut tally = HashMap::new();
        tally.insert("Option A".to_string(), 1);
        tally.insert("Option D".to_string(), 1);
        let grouped = group_similar_vote_options(Some(&backend), &tally);
        assert_eq!(grouped.len(), 2);
    }

    #[test]
    fn identical_labels_always_merge() {
        let backend = conclave_core::similarity::JaccardBackend;
        let mut tally = HashMap::new();
        tally.insert("option_a".to_string(), 1);
        tally.insert("option_a".to_string(), 1);
        let grouped = group_similar_vote_options(Some(&backend), &tally);
        assert_eq!(grouped.len(), 1);
    }
}
