//! Tool executor (C8): parses `TOOL_REQUEST:` markers out of model
//! responses and dispatches them to a small whitelist of read-only tools,
//! each bounded by a security policy and an outer timeout.

mod file_tree;
mod list_files;
mod read_file;
mod run_command;
mod search_code;

pub use file_tree::GetFileTreeTool;
pub(crate) use file_tree::render_file_tree;
pub use list_files::ListFilesTool;
pub use read_file::ReadFileTool;
pub use run_command::RunCommandTool;
pub use search_code::SearchCodeTool;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-tool security policy: bounds shared by every tool that touches the
/// filesystem.
#[derive(Debug, Clone)]
pub struct ToolSecurityConfig {
    pub max_file_size_bytes: u64,
    pub exclude_patterns: Vec<String>,
    pub command_whitelist: Vec<String>,
}

impl Default for ToolSecurityConfig {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 1024 * 1024,
            exclude_patterns: vec![
                "**/.git/**".into(),
                "**/node_modules/**".into(),
                "**/target/**".into(),
            ],
            command_whitelist: [
                "ls", "pwd", "cat", "head", "tail", "wc", "find", "git", "grep", "awk", "sed",
                "sort", "uniq", "tree", "file", "stat", "diff",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// `true` if `path` (relative to `base`) matches any of `patterns`.
pub fn is_path_excluded(path: &Path, patterns: &[String]) -> bool {
    let path_str = path.to_string_lossy();
    patterns.iter().any(|pattern| {
        glob::Pattern::new(pattern)
            .map(|p| p.matches(&path_str))
            .unwrap_or(false)
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolResult {
    pub tool: String,
    pub success: bool,
    pub output: String,
}

impl ToolResult {
    pub fn ok(tool: &str, output: impl Into<String>) -> Self {
        Self { tool: tool.to_string(), success: true, output: output.into() }
    }

    pub fn err(tool: &str, message: impl Into<String>) -> Self {
        Self { tool: tool.to_string(), success: false, output: message.into() }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    async fn execute(&self, arguments: &Value, working_directory: &Path) -> ToolResult;
}

/// Scans `text` for `TOOL_REQUEST:` markers and parses the JSON object that
/// follows each one using a streaming decoder, so a payload containing `}`
/// inside a string field still parses correctly; malformed requests are
/// skipped rather than surfaced.
pub fn parse_tool_requests(text: &str) -> Vec<ToolRequest> {
    const MARKER: &str = "TOOL_REQUEST:";
    let mut out = Vec::new();
    for line in text.lines() {
        let Some(marker_pos) = line.find(MARKER) else { continue };
        let after = &line[marker_pos + MARKER.len()..];
        let Some(json_start) = after.find('{') else { continue };
        let candidate = &after[json_start..];
        let mut stream = serde_json::Deserializer::from_str(candidate).into_iter::<ToolRequest>();
        if let Some(Ok(request)) = stream.next() {
            out.push(request);
        }
    }
    out
}

/// Restores the process working directory unconditionally when dropped.
/// Tools execute sequentially within a round (the orchestrator never runs
/// them concurrently), so process-global chdir is sound here.
struct ScopedCwd {
    original: PathBuf,
}

impl ScopedCwd {
    fn enter(target: &Path) -> std::io::Result<Self> {
        let original = std::env::current_dir()?;
        std::env::set_current_dir(target)?;
        Ok(Self { original })
    }
}

impl Drop for ScopedCwd {
    fn drop(&mut self) {
        let _ = std::env::set_current_dir(&self.original);
    }
}

pub const TOOL_TIMEOUT: Duration = Duration::from_secs(30);

pub struct ToolExecutor {
    tools: HashMap<String, Box<dyn Tool>>,
    security: ToolSecurityConfig,
}

impl ToolExecutor {
    pub fn new(security: ToolSecurityConfig) -> Self {
        let mut tools: HashMap<String, Box<dyn Tool>> = HashMap::new();
        tools.insert("read_file".into(), Box::new(ReadFileTool::new(security.clone())));
        tools.insert("search_code".into(), Box::new(SearchCodeTool::new()));
        tools.insert("list_files".into(), Box::new(ListFilesTool::new()));
        tools.insert("run_command".into(), Box::new(RunCommandTool::new(security.clone())));
        tools.insert("get_file_tree".into(), Box::new(GetFileTreeTool::new()));
        Self { tools, security }
    }

    /// Executes `request` under the outer 30s timeout, scoping the process
    /// cwd to `working_directory` for the duration of the call when one is
    /// given, and unconditionally restoring it afterward.
    pub async fn execute_tool(&self, request: &ToolRequest, working_directory: Option<&Path>) -> ToolResult {
        let Some(tool) = self.tools.get(request.name.as_str()) else {
            return ToolResult::err(&request.name, format!("unknown tool: {}", request.name));
        };

        let _scope = match working_directory {
            Some(dir) => match ScopedCwd::enter(dir) {
                Ok(scope) => Some(scope),
                Err(e) => return ToolResult::err(&request.name, format!("failed to enter working directory: {e}")),
            },
            None => None,
        };

        let wd = working_directory.unwrap_or_else(|| Path::new("."));
        match tokio::time::timeout(TOOL_TIMEOUT, tool.execute(&request.arguments, wd)).await {
            Ok(result) => result,
            Err(_) => ToolResult::err(&request.name, "tool execution timed out after 30s"),
        }
    }

    pub fn security(&self) -> &ToolSecurityConfig {
        &self.security
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_request_with_braces_inside_string_fields() {
        let text = r#"Let me check that. TOOL_REQUEST: {"name": "read_file", "arguments": {"path": "a{b}.txt"}}"#;
        let requests = parse_tool_requests(text);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].name, "read_file");
    }

    #[test]
    fn skips_malformed_requests() {
        let text = "TOOL_REQUEST: {not valid json";
        assert!(parse_tool_requests(text).is_empty());
    }

    #[tokio::test]
    async fn unknown_tool_yields_failed_result_not_panic() {
        let executor = ToolExecutor::new(ToolSecurityConfig::default());
        let req = ToolRequest { name: "delete_everything".into(), arguments: Value::Null };
        let result = executor.execute_tool(&req, None).await;
        assert!(!result.success);
    }
}
