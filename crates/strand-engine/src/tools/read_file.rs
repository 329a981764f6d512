use async_trait::async_trait;

use strand_core::tools::{ExecutionMode, Tool, ToolContext, ToolError, ToolOutput};

use super::resolve_path;

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file contents from the filesystem"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file, absolute or relative to the working directory"
                },
                "offset": {
                    "type": "integer",
                    "description": "Line number to start reading from (1-based)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to read"
                }
            }
        })
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Concurrent
    }

    async fn execute(
        &self,
        args: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError> {
        let raw_path = args["path"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("path is required".into()))?;

        let path = resolve_path(raw_path, &ctx.working_directory);

        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("failed to read {}: {e}", path.display()))
        })?;

        let offset = args["offset"].as_u64().unwrap_or(1).max(1) as usize;
        let limit = args["limit"].as_u64().unwrap_or(2000) as usize;

        let lines: Vec<&str> = content.lines().collect();
        let start = (offset - 1).min(lines.len());
        let end = (start + limit).min(lines.len());

        let mut output = String::new();
        for (i, line) in lines[start..end].iter().enumerate() {
            let line_num = start + i + 1;
            output.push_str(&format!("{line_num:>6}\t{line}\n"));
        }

        if output.is_empty() {
            output = "(empty file)".to_string();
        }

        Ok(ToolOutput::text(output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{temp_dir, test_ctx};
    use std::fs;

    #[tokio::test]
    async fn read_file() {
        let dir = temp_dir("strand_read");
        fs::write(dir.join("test.txt"), "line 1\nline 2\nline 3\n").unwrap();

        let tool = ReadFileTool;
        let result = tool
            .execute(serde_json::json!({"path": "test.txt"}), &test_ctx(&dir))
            .await
            .unwrap();

        assert!(!result.is_error);
        assert!(result.content.contains("line 1"));
        assert!(result.content.contains("line 3"));

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn read_with_offset_and_limit() {
        let dir = temp_dir("strand_read");
        let content: String = (1..=10).map(|i| format!("line {i}\n")).collect();
        fs::write(dir.join("test.txt"), &content).unwrap();

        let tool = ReadFileTool;
        let result = tool
            .execute(
                serde_json::json!({"path": "test.txt", "offset": 3, "limit": 2}),
                &test_ctx(&dir),
            )
            .await
            .unwrap();

        assert!(result.content.contains("line 3"));
        assert!(result.content.contains("line 4"));
        assert!(!result.content.contains("line 5"));

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn read_nonexistent_file() {
        let dir = std::env::temp_dir();
        let tool = ReadFileTool;
        let result = tool
            .execute(
                serde_json::json!({"path": "/nonexistent/file.txt"}),
                &test_ctx(&dir),
            )
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn missing_path_is_invalid() {
        let dir = std::env::temp_dir();
        let tool = ReadFileTool;
        let result = tool.execute(serde_json::json!({}), &test_ctx(&dir)).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments(_))));
    }
}
