pub mod bash;
pub mod list_dir;
pub mod read_file;
pub mod write_file;

use std::path::{Path, PathBuf};

/// Resolve a possibly-relative tool path against the working directory.
pub(crate) fn resolve_path(raw: &str, working_dir: &Path) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        working_dir.join(path)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::path::Path;

    use strand_core::ids::ThreadId;
    use strand_core::tools::ToolContext;
    use tokio_util::sync::CancellationToken;

    pub fn test_ctx(dir: &Path) -> ToolContext {
        ToolContext {
            thread_id: ThreadId::new(),
            parent_thread_id: None,
            working_directory: dir.to_path_buf(),
            abort: CancellationToken::new(),
        }
    }

    pub fn temp_dir(prefix: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("{prefix}_{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
