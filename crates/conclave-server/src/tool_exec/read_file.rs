use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::{is_path_excluded, Tool, ToolResult, ToolSecurityConfig};

pub struct ReadFileTool {
    security: ToolSecurityConfig,
}

impl ReadFileTool {
    pub fn new(security: ToolSecurityConfig) -> Self {
        Self { security }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    async fn execute(&self, arguments: &Value, working_directory: &Path) -> ToolResult {
        let Some(path_arg) = arguments.get("path").and_then(Value::as_str) else {
            return ToolResult::err(self.name(), "missing required argument: path");
        };

        if is_path_excluded(Path::new(path_arg), &self.security.exclude_patterns) {
            return ToolResult::err(self.name(), format!("path excluded by policy: {path_arg}"));
        }

        let resolved = working_directory.join(path_arg);
        let canonical_base = match working_directory.canonicalize() {
            Ok(p) => p,
            Err(e) => return ToolResult::err(self.name(), format!("cannot resolve working directory: {e}")),
        };
        let canonical_target = match resolved.canonicalize() {
            Ok(p) => p,
            Err(e) => return ToolResult::err(self.name(), format!("cannot resolve path: {e}")),
        };
        if canonical_target.strip_prefix(&canonical_base).is_err() {
            return ToolResult::err(self.name(), "path escapes working directory");
        }

        let metadata = match tokio::fs::metadata(&canonical_target).await {
            Ok(m) => m,
            Err(e) => return ToolResult::err(self.name(), format!("stat failed: {e}")),
        };
        if metadata.len() > self.security.max_file_size_bytes {
            return ToolResult::err(
                self.name(),
                format!("file too large: {} bytes (max {})", metadata.len(), self.security.max_file_size_bytes),
            );
        }

        match tokio::fs::read_to_string(&canonical_target).await {
            Ok(contents) => ToolResult::ok(self.name(), contents),
            Err(e) => ToolResult::err(self.name(), format!("read failed: {e}")),
        }
    }
}
