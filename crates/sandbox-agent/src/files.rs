//! File read/write, resolved under the workspace root.
//!
//! "A path is treated as absolute if it begins with the root separator,
//! else relative to `/workspace`". Missing files are a
//! `FileError`, not empty content.

use std::path::{Path, PathBuf};

use sandbox_core::error::{AgentError, AgentResult};
use tokio::io::AsyncWriteExt;

/// Resolve a caller-supplied path against the workspace root.
pub fn resolve(workspace_root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        candidate.to_path_buf()
    } else {
        workspace_root.join(candidate)
    }
}

fn file_error(path: &str, err: std::io::Error) -> AgentError {
    AgentError::FileError {
        path: path.to_string(),
        reason: err.to_string(),
    }
}

/// `POST /write_file`: mode `"w"` truncates, `"a"` appends. Parent
/// directories are created.
pub async fn write(workspace_root: &Path, path: &str, content: &str, mode: &str) -> AgentResult<()> {
    let resolved = resolve(workspace_root, path);
    if let Some(parent) = resolved.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| file_error(path, e))?;
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true);
    if mode == "a" {
        options.append(true);
    } else {
        options.truncate(true);
    }

    let mut file = options
        .open(&resolved)
        .await
        .map_err(|e| file_error(path, e))?;
    file.write_all(content.as_bytes())
        .await
        .map_err(|e| file_error(path, e))?;
    Ok(())
}

/// `POST /read_file`: a missing file surfaces as an error, not `""`.
pub async fn read(workspace_root: &Path, path: &str) -> AgentResult<String> {
    let resolved = resolve(workspace_root, path);
    tokio::fs::read_to_string(&resolved)
        .await
        .map_err(|e| file_error(path, e))
}
