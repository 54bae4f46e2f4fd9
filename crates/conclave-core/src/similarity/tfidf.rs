use std::collections::HashMap;

use super::{normalize_text, DecisionNode, ScoredCandidate, SimilarityBackend};

/// Document-local TF-IDF cosine similarity. The corpus is the pair (or
/// candidate set) passed in per call, not a persistent global index — the
/// candidate set changes on every retrieval, so there is nothing to
/// amortize by keeping state between calls.
pub struct TfIdfBackend;

impl TfIdfBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TfIdfBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn term_counts(s: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for tok in normalize_text(s).split(' ').filter(|t| !t.is_empty()) {
        *counts.entry(tok.to_string()).or_insert(0) += 1;
    }
    counts
}

fn tfidf_vector(counts: &HashMap<String, usize>, idf: &HashMap<String, f64>) -> HashMap<String, f64> {
    let total: usize = counts.values().sum();
    counts
        .iter()
        .map(|(term, count)| {
            let tf = *count as f64 / total.max(1) as f64;
            let weight = tf * idf.get(term).copied().unwrap_or(0.0);
            (term.clone(), weight)
        })
        .collect()
}

fn cosine(a: &HashMap<String, f64>, b: &HashMap<String, f64>) -> f64 {
    let dot: f64 = a.iter().map(|(k, v)| v * b.get(k).copied().unwrap_or(0.0)).sum();
    let norm_a = a.values().map(|v| v * v).sum::<f64>().sqrt();
    let norm_b = b.values().map(|v| v * v).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
    }
}

fn idf_over(docs: &[&str]) -> HashMap<String, f64> {
    let n = docs.len() as f64;
    let mut doc_freq: HashMap<String, usize> = HashMap::new();
    for doc in docs {
        for term in term_counts(doc).keys() {
            *doc_freq.entry(term.clone()).or_insert(0) += 1;
        }
    }
    doc_freq
        .into_iter()
        .map(|(term, df)| (term, (1.0 + n / (1.0 + df as f64)).ln()))
        .collect()
}

impl SimilarityBackend for TfIdfBackend {
    fn name(&self) -> &'static str {
        "tfidf"
    }

    fn compute_similarity(&self, a: &str, b: &str) -> f64 {
        if normalize_text(a).is_empty() || normalize_text(b).is_empty() {
            return 0.0;
        }
        let idf = idf_over(&[a, b]);
        let va = tfidf_vector(&term_counts(a), &idf);
        let vb = tfidf_vector(&term_counts(b), &idf);
        cosine(&va, &vb)
    }

    fn find_similar(&self, query: &str, candidates: &[DecisionNode], threshold: f64) -> Vec<ScoredCandidate> {
        if normalize_text(query).is_empty() {
            return Vec::new();
        }
        let docs: Vec<&str> = std::iter::once(query)
            .chain(candidates.iter().map(|c| c.question.as_str()))
            .collect();
        let idf = idf_over(&docs);
        let qv = tfidf_vector(&term_counts(query), &idf);

        let mut scored: Vec<ScoredCandidate> = candidates
            .iter()
            .filter(|c| !normalize_text(&c.question).is_empty())
            .map(|c| {
                let cv = tfidf_vector(&term_counts(&c.question), &idf);
                ScoredCandidate {
                    id: c.id.clone(),
                    question: c.question.clone(),
                    score: cosine(&qv, &cv),
                }
            })
            .filter(|sc| sc.score >= threshold)
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_scores_near_one() {
        let b = TfIdfBackend::new();
        assert!(b.compute_similarity("the quick brown fox", "the quick brown fox") >= 0.95);
    }

    #[test]
    fn empty_input_scores_zero() {
        let b = TfIdfBackend::new();
        assert_eq!(b.compute_similarity("", "something"), 0.0);
    }
}
