use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use walkdir::WalkDir;

use super::{Tool, ToolResult};

const MAX_DEPTH_CEILING: usize = 10;
const MAX_FILES_CEILING: usize = 1000;

/// Walks `working_directory` up to `max_depth`/`max_files` and renders it as
/// an indented listing. Shared by [`GetFileTreeTool`] (on-demand, via a
/// `TOOL_REQUEST:`) and the orchestrator's automatic round-1 injection.
pub(crate) fn render_file_tree(working_directory: &Path, max_depth: usize, max_files: usize) -> Result<String, String> {
    let max_depth = max_depth.min(MAX_DEPTH_CEILING);
    let max_files = max_files.min(MAX_FILES_CEILING);

    let canonical_base = working_directory
        .canonicalize()
        .map_err(|e| format!("cannot resolve working directory: {e}"))?;

    let mut lines = Vec::new();
    let mut count = 0;
    for entry in WalkDir::new(&canonical_base).max_depth(max_depth).into_iter().filter_map(Result::ok) {
        if entry.path() == canonical_base {
            continue;
        }
        let Ok(canonical) = entry.path().canonicalize() else { continue };
        if canonical.strip_prefix(&canonical_base).is_err() {
            continue;
        }
        let depth = entry.depth();
        let indent = "  ".repeat(depth.saturating_sub(1));
        let name = entry.file_name().to_string_lossy();
        lines.push(format!("{indent}{name}"));
        count += 1;
        if count >= max_files {
            lines.push(format!("... truncated at {max_files} entries"));
            break;
        }
    }

    Ok(lines.join("\n"))
}

pub struct GetFileTreeTool;

impl GetFileTreeTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for GetFileTreeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for GetFileTreeTool {
    fn name(&self) -> &str {
        "get_file_tree"
    }

    async fn execute(&self, arguments: &Value, working_directory: &Path) -> ToolResult {
        let max_depth = arguments.get("max_depth").and_then(Value::as_u64).unwrap_or(3) as usize;
        let max_files = arguments.get("max_files").and_then(Value::as_u64).unwrap_or(200) as usize;

        match render_file_tree(working_directory, max_depth, max_files) {
            Ok(tree) => ToolResult::ok(self.name(), tree),
            Err(e) => ToolResult::err(self.name(), e),
        }
    }
}
