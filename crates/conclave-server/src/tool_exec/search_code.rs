use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use walkdir::WalkDir;

use super::{Tool, ToolResult};

const MAX_RESULTS: usize = 100;
const SOURCE_EXTENSIONS: &[&str] = &["rs", "py", "js", "ts", "go", "java", "c", "cpp", "h", "hpp", "rb", "toml", "md"];

pub struct SearchCodeTool;

impl SearchCodeTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SearchCodeTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn name(&self) -> &str {
        "search_code"
    }

    async fn execute(&self, arguments: &Value, working_directory: &Path) -> ToolResult {
        let Some(pattern) = arguments.get("pattern").and_then(Value::as_str) else {
            return ToolResult::err(self.name(), "missing required argument: pattern");
        };
        let regex = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolResult::err(self.name(), format!("invalid pattern: {e}")),
        };

        let mut matches = Vec::new();
        'walk: for entry in WalkDir::new(working_directory).into_iter().filter_map(Result::ok) {
            if !entry.file_type().is_file() {
                continue;
            }
            let has_source_ext = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| SOURCE_EXTENSIONS.contains(&ext))
                .unwrap_or(false);
            if !has_source_ext {
                continue;
            }
            let Ok(contents) = std::fs::read_to_string(entry.path()) else { continue };
            for (line_no, line) in contents.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(format!("{}:{}: {}", entry.path().display(), line_no + 1, line.trim()));
                    if matches.len() >= MAX_RESULTS {
                        break 'walk;
                    }
                }
            }
        }

        ToolResult::ok(self.name(), matches.join("\n"))
    }
}
