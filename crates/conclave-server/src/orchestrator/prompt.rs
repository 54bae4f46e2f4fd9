//! Prompt assembly for one adapter invocation within a deliberation round.

/// Builds the prompt sent to a single participant for one round.
///
/// `graph_context` and `file_tree` are only `Some` on round 1 (prior-decision
/// context and the working-directory layout are injected once, not repeated
/// every round). `in_round_context` carries the responses other participants
/// have already given in the current round so later participants can react
/// to earlier ones.
#[allow(clippy::too_many_arguments)]
pub fn build_prompt(
    question: &str,
    round: u32,
    total_rounds: u32,
    graph_context: Option<&str>,
    file_tree: Option<&str>,
    in_round_context: &str,
    tool_context: &str,
    tools_enabled: bool,
) -> String {
    let mut sections = Vec::new();

    sections.push(format!(
        "You are participating in a structured deliberation (round {round} of {total_rounds}).\n\nQuestion:\n{question}"
    ));

    if let Some(context) = graph_context {
        if !context.is_empty() {
            sections.push(format!("Relevant past decisions:\n{context}"));
        }
    }

    if let Some(tree) = file_tree {
        if !tree.is_empty() {
            sections.push(format!("Working directory layout:\n{tree}"));
        }
    }

    if !in_round_context.is_empty() {
        sections.push(format!("Other participants have already responded this round:\n{in_round_context}"));
    }

    if !tool_context.is_empty() {
        sections.push(format!("Recent tool output from earlier rounds:\n{tool_context}"));
    }

    if tools_enabled {
        sections.push(
            "You may request a tool by emitting a line of the form:\n\
             TOOL_REQUEST: {\"name\": \"<tool_name>\", \"arguments\": {...}}\n\
             Available tools: read_file, search_code, list_files, run_command, get_file_tree."
                .to_string(),
        );
    }

    sections.push(
        "When you are ready to vote, include a line of the form:\n\
         VOTE: {\"option\": \"<your choice>\", \"confidence\": <0.0-1.0>, \"rationale\": \"...\", \"continue_debate\": <true|false>}"
            .to_string(),
    );

    sections.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_one_includes_graph_context_later_rounds_do_not() {
        let with_context = build_prompt("Should we do X?", 1, 3, Some("Past decision: did X before"), None, "", "", false);
        assert!(with_context.contains("Past decision"));

        let later_round = build_prompt("Should we do X?", 2, 3, None, None, "prior responses here", "", false);
        assert!(!later_round.contains("Past decision"));
        assert!(later_round.contains("prior responses here"));
    }

    #[test]
    fn round_one_includes_file_tree_later_rounds_do_not() {
        let with_tree = build_prompt("Should we do X?", 1, 3, None, Some("src/\n  main.rs"), "", "", false);
        assert!(with_tree.contains("Working directory layout"));
        assert!(with_tree.contains("main.rs"));

        let later_round = build_prompt("Should we do X?", 2, 3, None, None, "prior responses here", "", false);
        assert!(!later_round.contains("Working directory layout"));
    }

    #[test]
    fn tool_instructions_only_appear_when_enabled() {
        let enabled = build_prompt("Should we do X?", 1, 1, None, None, "", "", true);
        assert!(enabled.contains("TOOL_REQUEST"));
        let disabled = build_prompt("Should we do X?", 1, 1, None, None, "", "", false);
        assert!(!disabled.contains("TOOL_REQUEST"));
    }
}
