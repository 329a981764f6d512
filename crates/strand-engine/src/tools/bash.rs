use async_trait::async_trait;
use tokio::process::Command;

use strand_core::tools::{ExecutionMode, Tool, ToolContext, ToolError, ToolOutput};

pub struct BashTool;

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Run a shell command in the working directory"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Shell command to execute"
                }
            }
        })
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Sequential
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let command = args["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("command is required".into()))?;

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.working_directory)
            .kill_on_drop(true)
            .output();

        let output = tokio::select! {
            result = child => result
                .map_err(|e| ToolError::ExecutionFailed(format!("failed to spawn: {e}")))?,
            () = ctx.abort.cancelled() => return Err(ToolError::Cancelled),
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.is_empty() {
            if !combined.is_empty() {
                combined.push('\n');
            }
            combined.push_str(&stderr);
        }

        if output.status.success() {
            Ok(ToolOutput::text(combined))
        } else {
            let code = output.status.code().unwrap_or(-1);
            Ok(ToolOutput::error(format!(
                "exit status {code}\n{combined}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{temp_dir, test_ctx};
    use std::fs;

    #[tokio::test]
    async fn runs_command() {
        let dir = temp_dir("strand_bash");
        let tool = BashTool;
        let result = tool
            .execute(serde_json::json!({"command": "echo hello"}), &test_ctx(&dir))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert!(result.content.contains("hello"));
        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = temp_dir("strand_bash");
        fs::write(dir.join("marker.txt"), "x").unwrap();

        let tool = BashTool;
        let result = tool
            .execute(serde_json::json!({"command": "ls"}), &test_ctx(&dir))
            .await
            .unwrap();
        assert!(result.content.contains("marker.txt"));
        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn nonzero_exit_is_error_output() {
        let dir = temp_dir("strand_bash");
        let tool = BashTool;
        let result = tool
            .execute(serde_json::json!({"command": "exit 3"}), &test_ctx(&dir))
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.contains("exit status 3"));
        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn abort_cancels_command() {
        let dir = temp_dir("strand_bash");
        let ctx = test_ctx(&dir);
        ctx.abort.cancel();

        let tool = BashTool;
        let result = tool
            .execute(serde_json::json!({"command": "sleep 10"}), &ctx)
            .await;
        assert!(matches!(result, Err(ToolError::Cancelled)));
        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn stderr_captured() {
        let dir = temp_dir("strand_bash");
        let tool = BashTool;
        let result = tool
            .execute(
                serde_json::json!({"command": "echo oops >&2"}),
                &test_ctx(&dir),
            )
            .await
            .unwrap();
        assert!(result.content.contains("oops"));
        fs::remove_dir_all(&dir).ok();
    }
}
