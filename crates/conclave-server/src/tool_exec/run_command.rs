use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{Tool, ToolResult, ToolSecurityConfig};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

pub struct RunCommandTool {
    security: ToolSecurityConfig,
}

impl RunCommandTool {
    pub fn new(security: ToolSecurityConfig) -> Self {
        Self { security }
    }
}

#[async_trait]
impl Tool for RunCommandTool {
    fn name(&self) -> &str {
        "run_command"
    }

    async fn execute(&self, arguments: &Value, working_directory: &Path) -> ToolResult {
        let Some(command_line) = arguments.get("command").and_then(Value::as_str) else {
            return ToolResult::err(self.name(), "missing required argument: command");
        };
        let mut parts = command_line.split_whitespace();
        let Some(program) = parts.next() else {
            return ToolResult::err(self.name(), "empty command");
        };
        if !self.security.command_whitelist.iter().any(|c| c == program) {
            return ToolResult::err(self.name(), format!("command not permitted: {program}"));
        }

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(parts).current_dir(working_directory);

        let output = tokio::time::timeout(COMMAND_TIMEOUT, cmd.output()).await;
        match output {
            Ok(Ok(output)) => {
                let mut text = String::from_utf8_lossy(&output.stdout).to_string();
                if !output.stderr.is_empty() {
                    text.push_str("\n[stderr]\n");
                    text.push_str(&String::from_utf8_lossy(&output.stderr));
                }
                ToolResult::ok(self.name(), text)
            }
            Ok(Err(e)) => ToolResult::err(self.name(), format!("failed to run command: {e}")),
            Err(_) => ToolResult::err(self.name(), "command timed out after 10s"),
        }
    }
}
