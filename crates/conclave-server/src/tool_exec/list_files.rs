use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, ToolResult};

const MAX_FILES: usize = 200;

pub struct ListFilesTool;

impl ListFilesTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ListFilesTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        "list_files"
    }

    async fn execute(&self, arguments: &Value, working_directory: &Path) -> ToolResult {
        let pattern = arguments.get("pattern").and_then(Value::as_str).unwrap_or("*");
        let full_pattern = working_directory.join(pattern);
        let full_pattern_str = full_pattern.to_string_lossy().to_string();

        let paths = match glob::glob(&full_pattern_str) {
            Ok(paths) => paths,
            Err(e) => return ToolResult::err(self.name(), format!("invalid pattern: {e}")),
        };

        let mut files: Vec<String> = paths
            .filter_map(Result::ok)
            .take(MAX_FILES)
            .map(|p| p.display().to_string())
            .collect();
        files.sort();

        ToolResult::ok(self.name(), files.join("\n"))
    }
}
