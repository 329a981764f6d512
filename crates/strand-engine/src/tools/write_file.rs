use async_trait::async_trait;

use strand_core::tools::{ExecutionMode, Tool, ToolContext, ToolError, ToolOutput};

use super::resolve_path;

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file, creating parent directories as needed"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["path", "content"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the working directory"
                },
                "content": {
                    "type": "string",
                    "description": "Full content to write"
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
        let raw_path = args["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("path is required".into()))?;
        let content = args["content"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("content is required".into()))?;

        let path = resolve_path(raw_path, &ctx.working_directory);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ToolError::ExecutionFailed(format!("failed to create {}: {e}", parent.display()))
            })?;
        }

        tokio::fs::write(&path, content).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("failed to write {}: {e}", path.display()))
        })?;

        Ok(ToolOutput::text(format!(
            "wrote {} bytes to {}",
            content.len(),
            path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{temp_dir, test_ctx};
    use std::fs;

    #[tokio::test]
    async fn write_creates_file() {
        let dir = temp_dir("strand_write");
        let tool = WriteFileTool;

        let result = tool
            .execute(
                serde_json::json!({"path": "out.txt", "content": "hello"}),
                &test_ctx(&dir),
            )
            .await
            .unwrap();

        assert!(!result.is_error);
        assert_eq!(fs::read_to_string(dir.join("out.txt")).unwrap(), "hello");

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn write_creates_parent_dirs() {
        let dir = temp_dir("strand_write");
        let tool = WriteFileTool;

        tool.execute(
            serde_json::json!({"path": "a/b/out.txt", "content": "nested"}),
            &test_ctx(&dir),
        )
        .await
        .unwrap();

        assert_eq!(fs::read_to_string(dir.join("a/b/out.txt")).unwrap(), "nested");

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_content_is_invalid() {
        let dir = std::env::temp_dir();
        let tool = WriteFileTool;
        let result = tool
            .execute(serde_json::json!({"path": "x.txt"}), &test_ctx(&dir))
            .await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
