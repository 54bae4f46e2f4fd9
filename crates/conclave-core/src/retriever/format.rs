use crate::config::TierBoundaries;
use crate::types::SimilarityMatch;

const HEADER: &str = "## Similar Past Deliberations (Decision Graph Memory)\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Strong,
    Moderate,
    Brief,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierCounts {
    pub strong: usize,
    pub moderate: usize,
    pub brief: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FormattedContext {
    pub text: String,
    pub tokens_used: usize,
    pub tier_distribution: TierCounts,
    pub scored_count: usize,
}

fn estimate_tokens(s: &str) -> usize {
    s.chars().count() / 4
}

fn tier_for(score: f64, boundaries: TierBoundaries) -> Tier {
    if score >= boundaries.strong {
        Tier::Strong
    } else if score >= boundaries.moderate {
        Tier::Moderate
    } else {
        Tier::Brief
    }
}

fn render_strong(m: &SimilarityMatch) -> String {
    let mut out = format!(
        "### {} (strong match, {:.2})\n**Date:** {}\n**Status:** {}\n**Consensus:** {}\n",
        m.node.question,
        m.score,
        m.node.timestamp.to_rfc3339(),
        m.node.convergence_status,
        m.node.consensus,
    );
    if let Some(opt) = &m.node.winning_option {
        out.push_str(&format!("**Winning Option:** {opt}\n"));
    }
    out.push_str(&format!("**Participants:** {}\n", m.node.participants.join(", ")));
    out
}

fn render_moderate(m: &SimilarityMatch) -> String {
    let mut out = format!(
        "### {} (moderate match, {:.2})\n**Consensus:** {}\n",
        m.node.question, m.score, m.node.consensus,
    );
    if let Some(opt) = &m.node.winning_option {
        out.push_str(&format!("**Result:** {opt}\n"));
    }
    out
}

fn render_brief(m: &SimilarityMatch) -> String {
    let head: String = m
        .node
        .winning_option
        .clone()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| m.node.consensus.clone());
    let head: String = head.chars().take(50).collect();
    format!("- **Brief Match** ({:.2}): {} → {}\n", m.score, m.node.question, head)
}

/// Renders `scored` (already in descending-score order) into tiered
/// markdown, stopping (not skipping) the first time a block would exceed
/// `token_budget`.
pub fn format_context_tiered(
    scored: &[SimilarityMatch],
    boundaries: TierBoundaries,
    noise_floor: f64,
    token_budget: usize,
) -> FormattedContext {
    let header_tokens = estimate_tokens(HEADER);
    let mut body = String::new();
    let mut tokens_used = header_tokens;
    let mut counts = TierCounts::default();

    if header_tokens <= token_budget {
        for m in scored {
            if m.score < noise_floor {
                continue;
            }
            let tier = tier_for(m.score, boundaries);
            let block = match tier {
                Tier::Strong => render_strong(m),
                Tier::Moderate => render_moderate(m),
                Tier::Brief => render_brief(m),
            };
            let block_tokens = estimate_tokens(&block);
            if tokens_used + block_tokens > token_budget {
                break;
            }
            body.push_str(&block);
            tokens_used += block_tokens;
            match tier {
                Tier::Strong => counts.strong += 1,
                Tier::Moderate => counts.moderate += 1,
                Tier::Brief => counts.brief += 1,
            }
        }
    }

    // Nothing cleared the noise floor (or fit the budget): no point emitting
    // a bare header, and the caller (context injection) needs a true empty
    // string to mean "no relevant history" rather than "a memory section with
    // nothing in it".
    if counts.strong + counts.moderate + counts.brief == 0 {
        return FormattedContext {
            text: String::new(),
            tokens_used: 0,
            tier_distribution: counts,
            scored_count: scored.len(),
        };
    }

    let mut text = String::with_capacity(HEADER.len() + body.len());
    text.push_str(HEADER);
    text.push_str(&body);

    FormattedContext {
        text,
        tokens_used,
        tier_distribution: counts,
        scored_count: scored.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ConvergenceStatus, DecisionNode};

    fn a_match(question: &str, score: f64) -> SimilarityMatch {
        SimilarityMatch {
            node: DecisionNode::new(question, ConvergenceStatus::Converged),
            score,
        }
    }

    #[test]
    fn tiers_assigned_and_noise_floor_filters() {
        let scored = vec![a_match("strong one", 0.90), a_match("moderate one", 0.65), a_match("below floor", 0.30)];
        let result = format_context_tiered(&scored, TierBoundaries::default(), 0.40, 5000);
        assert_eq!(result.tier_distribution, TierCounts { strong: 1, moderate: 1, brief: 0 });
    }

    #[test]
    fn budget_hard_stops_and_never_exceeds() {
        let scored = vec![a_match("one", 0.90), a_match("two", 0.85), a_match("three", 0.80)];
        let full = format_context_tiered(&scored, TierBoundaries::default(), 0.40, 10_000);
        let one_block_budget = estimate_tokens(HEADER) + estimate_tokens(&render_strong(&scored[0])) + 1;
        let limited = format_context_tiered(&scored, TierBoundaries::default(), 0.40, one_block_budget);
        assert!(limited.tokens_used <= one_block_budget);
        assert_eq!(limited.tier_distribution.strong, 1);
        assert!(full.tier_distribution.strong >= limited.tier_distribution.strong);
    }

    #[test]
    fn items_processed_in_descending_order_honored_by_caller() {
        // format_context_tiered trusts its input is pre-sorted; verify it
        // does not itself reorder.
        let scored = vec![a_match("low", 0.5), a_match("high", 0.9)];
        let result = format_context_tiered(&scored, TierBoundaries::default(), 0.40, 10_000);
        assert!(result.text.find("low").unwrap() < result.text.find("high").unwrap());
    }
}
