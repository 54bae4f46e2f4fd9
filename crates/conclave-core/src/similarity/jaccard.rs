use std::collections::HashSet;

use super::{normalize_text, SimilarityBackend};

/// Token-Jaccard similarity: `|intersection| / |union|` over whitespace
/// tokens of the normalized text. The always-available fallback — no
/// external dependency, never fails.
pub struct JaccardBackend;

fn tokens(s: &str) -> HashSet<String> {
    normalize_text(s).split(' ').filter(|t| !t.is_empty()).map(str::to_string).collect()
}

impl SimilarityBackend for JaccardBackend {
    fn name(&self) -> &'static str {
        "jaccard"
    }

    fn compute_similarity(&self, a: &str, b: &str) -> f64 {
        let ta = tokens(a);
        let tb = tokens(b);
        if ta.is_empty() || tb.is_empty() {
            return 0.0;
        }
        let intersection = ta.intersection(&tb).count();
        let union = ta.union(&tb).count();
        if union == 0 {
            0.0
        } else {
            intersection as f64 / union as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_sets_score_one() {
        let b = JaccardBackend;
        assert!((b.compute_similarity("rust is great", "Rust  is   great") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn disjoint_sets_score_zero() {
        let b = JaccardBackend;
        assert_eq!(b.compute_similarity("alpha", "beta"), 0.0);
    }
}
