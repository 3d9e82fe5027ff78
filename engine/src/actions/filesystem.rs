//! File actions
//!
//! `read_file`, `write_file`, `list_directory`, `copy_file` and
//! `delete_file`. Every path goes through [`PathGuard`] before any I/O
//! happens.

use async_trait::async_trait;
use sdk::{Action, ActionParams, EngineError};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use super::guard::PathGuard;

/// Largest file `read_file` will return
pub const MAX_READ_BYTES: u64 = 1024 * 1024;

/// Entry cap for `list_directory`
const MAX_LIST_ENTRIES: usize = 1000;

fn ensure_enabled(enabled: bool) -> Result<(), EngineError> {
    if enabled {
        Ok(())
    } else {
        Err(EngineError::PermissionDenied(
            "file operations are disabled (security.allow_file_operations)".to_string(),
        ))
    }
}

pub struct ReadFile {
    guard: Arc<PathGuard>,
    enabled: bool,
}

impl ReadFile {
    pub fn new(guard: Arc<PathGuard>, enabled: bool) -> Self {
        Self { guard, enabled }
    }
}

#[async_trait]
impl Action for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a UTF-8 text file from the workspace"
    }

    fn parameters(&self) -> &[&'static str] {
        &["path"]
    }

    async fn execute(&self, params: &ActionParams) -> Result<Value, EngineError> {
        ensure_enabled(self.enabled)?;
        let path = self.guard.resolve(params.str("path")?)?;
        info!("Reading file: {}", path.display());

        let size = fs::metadata(&path).await?.len();
        if size > MAX_READ_BYTES {
            return Err(EngineError::ActionFailed(format!(
                "{} is {} bytes, limit is {}",
                path.display(),
                size,
                MAX_READ_BYTES
            )));
        }

        let content = fs::read_to_string(&path).await.map_err(|e| {
            EngineError::ActionFailed(format!("Failed to read {}: {}", path.display(), e))
        })?;

        debug!("Read {} bytes from {}", content.len(), path.display());
        Ok(json!({
            "path": path.display().to_string(),
            "content": content,
            "size": size,
        }))
    }
}

pub struct WriteFile {
    guard: Arc<PathGuard>,
    enabled: bool,
}

impl WriteFile {
    pub fn new(guard: Arc<PathGuard>, enabled: bool) -> Self {
        Self { guard, enabled }
    }
}

#[async_trait]
impl Action for WriteFile {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Write text to a file in the workspace, creating parent directories"
    }

    fn parameters(&self) -> &[&'static str] {
        &["path", "content"]
    }

    async fn execute(&self, params: &ActionParams) -> Result<Value, EngineError> {
        ensure_enabled(self.enabled)?;
        let path = self.guard.resolve_new(params.str("path")?)?;
        let content = params.str("content")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        info!("Writing {} bytes to: {}", content.len(), path.display());
        fs::write(&path, content).await.map_err(|e| {
            EngineError::ActionFailed(format!("Failed to write {}: {}", path.display(), e))
        })?;

        Ok(json!({
            "path": path.display().to_string(),
            "bytes_written": content.len(),
        }))
    }
}

pub struct ListDirectory {
    guard: Arc<PathGuard>,
    enabled: bool,
}

impl ListDirectory {
    pub fn new(guard: Arc<PathGuard>, enabled: bool) -> Self {
        Self { guard, enabled }
    }
}

#[async_trait]
impl Action for ListDirectory {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "List the entries of a workspace directory, optionally recursively"
    }

    fn parameters(&self) -> &[&'static str] {
        &["path", "recursive"]
    }

    async fn execute(&self, params: &ActionParams) -> Result<Value, EngineError> {
        ensure_enabled(self.enabled)?;
        let root = self.guard.resolve(params.str_opt("path").unwrap_or("."))?;
        let recursive = params.bool_opt("recursive").unwrap_or(false);
        info!("Listing directory: {} (recursive={})", root.display(), recursive);

        let mut entries = Vec::new();
        let mut pending = vec![root.clone()];
        let mut truncated = false;

        while let Some(dir) = pending.pop() {
            let mut reader = fs::read_dir(&dir).await.map_err(|e| {
                EngineError::ActionFailed(format!("Failed to read {}: {}", dir.display(), e))
            })?;

            while let Some(entry) = reader.next_entry().await? {
                if entries.len() >= MAX_LIST_ENTRIES {
                    truncated = true;
                    break;
                }

                let file_type = entry.file_type().await?;
                let path = entry.path();
                let kind = if file_type.is_dir() {
                    "directory"
                } else if file_type.is_symlink() {
                    "symlink"
                } else {
                    "file"
                };
                let size = if file_type.is_file() {
                    entry.metadata().await.map(|m| m.len()).unwrap_or(0)
                } else {
                    0
                };

                if recursive && file_type.is_dir() {
                    pending.push(path.clone());
                }
                entries.push((relative_name(&root, &path), kind, size));
            }
        }

        entries.sort_by(|a, b| a.0.cmp(&b.0));
        let count = entries.len();
        let entries: Vec<Value> = entries
            .into_iter()
            .map(|(name, kind, size)| json!({ "name": name, "type": kind, "size": size }))
            .collect();

        Ok(json!({
            "path": root.display().to_string(),
            "entries": entries,
            "count": count,
            "truncated": truncated,
        }))
    }
}

pub struct CopyFile {
    guard: Arc<PathGuard>,
    enabled: bool,
}

impl CopyFile {
    pub fn new(guard: Arc<PathGuard>, enabled: bool) -> Self {
        Self { guard, enabled }
    }
}

#[async_trait]
impl Action for CopyFile {
    fn name(&self) -> &str {
        "copy_file"
    }

    fn description(&self) -> &str {
        "Copy a file within the workspace, creating destination directories"
    }

    fn parameters(&self) -> &[&'static str] {
        &["src", "dst"]
    }

    async fn execute(&self, params: &ActionParams) -> Result<Value, EngineError> {
        ensure_enabled(self.enabled)?;
        let src = self.guard.resolve(params.str("src")?)?;
        let dst = self.guard.resolve_new(params.str("dst")?)?;

        if !fs::metadata(&src).await?.is_file() {
            return Err(EngineError::ActionFailed(format!(
                "{} is not a regular file",
                src.display()
            )));
        }
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }

        info!("Copying {} to {}", src.display(), dst.display());
        let bytes = fs::copy(&src, &dst).await.map_err(|e| {
            EngineError::ActionFailed(format!(
                "Failed to copy {} to {}: {}",
                src.display(),
                dst.display(),
                e
            ))
        })?;

        Ok(json!({
            "src": src.display().to_string(),
            "dst": dst.display().to_string(),
            "bytes_copied": bytes,
        }))
    }
}

pub struct DeleteFile {
    guard: Arc<PathGuard>,
    enabled: bool,
}

impl DeleteFile {
    pub fn new(guard: Arc<PathGuard>, enabled: bool) -> Self {
        Self { guard, enabled }
    }
}

#[async_trait]
impl Action for DeleteFile {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file, or a directory and its contents, inside the workspace"
    }

    fn parameters(&self) -> &[&'static str] {
        &["path"]
    }

    async fn execute(&self, params: &ActionParams) -> Result<Value, EngineError> {
        ensure_enabled(self.enabled)?;
        let path = self.guard.resolve(params.str("path")?)?;

        // the workspace root itself is never removable
        if path == self.guard.workspace() {
            return Err(EngineError::PathDenied(path));
        }

        let kind = if fs::metadata(&path).await?.is_dir() {
            info!("Deleting directory: {}", path.display());
            fs::remove_dir_all(&path).await.map_err(|e| {
                EngineError::ActionFailed(format!("Failed to delete {}: {}", path.display(), e))
            })?;
            "directory"
        } else {
            info!("Deleting file: {}", path.display());
            fs::remove_file(&path).await.map_err(|e| {
                EngineError::ActionFailed(format!("Failed to delete {}: {}", path.display(), e))
            })?;
            "file"
        };

        Ok(json!({
            "path": path.display().to_string(),
            "type": kind,
            "deleted": true,
        }))
    }
}

fn relative_name(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(PathBuf::from)
        .unwrap_or_else(|_| path.to_path_buf())
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<PathGuard>) {
        let temp = TempDir::new().unwrap();
        let guard = Arc::new(PathGuard::new(temp.path(), &[]).unwrap());
        (temp, guard)
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let (_temp, guard) = setup();
        let write = WriteFile::new(Arc::clone(&guard), true);
        let read = ReadFile::new(Arc::clone(&guard), true);

        let params = ActionParams::new()
            .with("path", json!("a/b/hello.txt"))
            .with("content", json!("hello world"));
        let written = write.execute(&params).await.unwrap();
        assert_eq!(written["bytes_written"], 11);

        let read_back = read
            .execute(&ActionParams::new().with("path", json!("a/b/hello.txt")))
            .await
            .unwrap();
        assert_eq!(read_back["content"], "hello world");
    }

    #[tokio::test]
    async fn test_write_disabled() {
        let (_temp, guard) = setup();
        let write = WriteFile::new(guard, false);
        let params = ActionParams::new()
            .with("path", json!("x.txt"))
            .with("content", json!("x"));

        let err = write.execute(&params).await.unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_read_missing_parameter() {
        let (_temp, guard) = setup();
        let err = ReadFile::new(guard, true)
            .execute(&ActionParams::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn test_list_directory_sorted_and_recursive() {
        let (temp, guard) = setup();
        std::fs::write(temp.path().join("b.txt"), "b").unwrap();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(temp.path().join("sub")).unwrap();
        std::fs::write(temp.path().join("sub").join("c.txt"), "c").unwrap();

        let list = ListDirectory::new(guard, true);

        let flat = list.execute(&ActionParams::new()).await.unwrap();
        assert_eq!(flat["count"], 3);
        assert_eq!(flat["entries"][0]["name"], "a.txt");
        assert_eq!(flat["entries"][2]["type"], "directory");

        let deep = list
            .execute(&ActionParams::new().with("recursive", json!(true)))
            .await
            .unwrap();
        assert_eq!(deep["count"], 4);
    }

    #[tokio::test]
    async fn test_copy_creates_destination_dirs() {
        let (temp, guard) = setup();
        std::fs::write(temp.path().join("src.txt"), "payload").unwrap();

        let copied = CopyFile::new(guard, true)
            .execute(
                &ActionParams::new()
                    .with("src", json!("src.txt"))
                    .with("dst", json!("backup/dst.txt")),
            )
            .await
            .unwrap();

        assert_eq!(copied["bytes_copied"], 7);
        let copy = std::fs::read_to_string(temp.path().join("backup").join("dst.txt")).unwrap();
        assert_eq!(copy, "payload");
        assert!(temp.path().join("src.txt").exists());
    }

    #[tokio::test]
    async fn test_copy_rejects_escaping_destination() {
        let (temp, guard) = setup();
        std::fs::write(temp.path().join("src.txt"), "payload").unwrap();

        let err = CopyFile::new(guard, true)
            .execute(
                &ActionParams::new()
                    .with("src", json!("src.txt"))
                    .with("dst", json!("../outside.txt")),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PathOutsideWorkspace(_)));
    }

    #[tokio::test]
    async fn test_delete_file_and_directory() {
        let (temp, guard) = setup();
        std::fs::write(temp.path().join("gone.txt"), "x").unwrap();
        std::fs::create_dir_all(temp.path().join("tree").join("leaf")).unwrap();
        std::fs::write(temp.path().join("tree").join("leaf").join("f.txt"), "x").unwrap();

        let delete = DeleteFile::new(guard, true);

        let file = delete
            .execute(&ActionParams::new().with("path", json!("gone.txt")))
            .await
            .unwrap();
        assert_eq!(file["type"], "file");
        assert!(!temp.path().join("gone.txt").exists());

        let dir = delete
            .execute(&ActionParams::new().with("path", json!("tree")))
            .await
            .unwrap();
        assert_eq!(dir["type"], "directory");
        assert!(!temp.path().join("tree").exists());
    }

    #[tokio::test]
    async fn test_delete_refuses_workspace_root_and_missing_paths() {
        let (temp, guard) = setup();
        let delete = DeleteFile::new(guard, true);

        let root = delete
            .execute(&ActionParams::new().with("path", json!(".")))
            .await
            .unwrap_err();
        assert!(matches!(root, EngineError::PathDenied(_)));
        assert!(temp.path().exists());

        let missing = delete
            .execute(&ActionParams::new().with("path", json!("nope.txt")))
            .await
            .unwrap_err();
        assert!(matches!(missing, EngineError::PathCanonicalization(_, _)));
    }

    #[tokio::test]
    async fn test_delete_disabled() {
        let (temp, guard) = setup();
        std::fs::write(temp.path().join("keep.txt"), "x").unwrap();

        let err = DeleteFile::new(guard, false)
            .execute(&ActionParams::new().with("path", json!("keep.txt")))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied(_)));
        assert!(temp.path().join("keep.txt").exists());
    }
}
