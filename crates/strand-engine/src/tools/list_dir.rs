use async_trait::async_trait;

use strand_core::tools::{ExecutionMode, Tool, ToolContext, ToolError, ToolOutput};

use super::resolve_path;

pub struct ListDirTool;

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "List directory entries, directories first"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list; defaults to the working directory"
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
        let path = match args["path"].as_str() {
            Some(raw) => resolve_path(raw, &ctx.working_directory),
            None => ctx.working_directory.clone(),
        };

        let mut reader = tokio::fs::read_dir(&path).await.map_err(|e| {
            ToolError::ExecutionFailed(format!("failed to list {}: {e}", path.display()))
        })?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        while let Some(entry) = reader.next_entry().await.map_err(|e| {
            ToolError::ExecutionFailed(format!("failed to read entry: {e}"))
        })? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                dirs.push(format!("{name}/"));
            } else {
                files.push(name);
            }
        }

        dirs.sort();
        files.sort();
        dirs.extend(files);

        if dirs.is_empty() {
            return Ok(ToolOutput::text("(empty directory)"));
        }
        Ok(ToolOutput::text(dirs.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{temp_dir, test_ctx};
    use std::fs;

    #[tokio::test]
    async fn lists_dirs_then_files() {
        let dir = temp_dir("strand_ls");
        fs::create_dir(dir.join("sub")).unwrap();
        fs::write(dir.join("a.txt"), "a").unwrap();
        fs::write(dir.join("b.txt"), "b").unwrap();

        let tool = ListDirTool;
        let result = tool
            .execute(serde_json::json!({}), &test_ctx(&dir))
            .await
            .unwrap();

        let lines: Vec<&str> = result.content.lines().collect();
        assert_eq!(lines, vec!["sub/", "a.txt", "b.txt"]);

        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn empty_directory() {
        let dir = temp_dir("strand_ls");
        let tool = ListDirTool;
        let result = tool
            .execute(serde_json::json!({}), &test_ctx(&dir))
            .await
            .unwrap();
        assert_eq!(result.content, "(empty directory)");
        fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn missing_directory_fails() {
        let dir = std::env::temp_dir();
        let tool = ListDirTool;
        let result = tool
            .execute(serde_json::json!({"path": "/nonexistent-dir-xyz"}), &test_ctx(&dir))
            .await;
        assert!(result.is_err());
    }
}
