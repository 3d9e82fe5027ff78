use sdk::errors::EngineError;
use std::path::{Component, Path, PathBuf};

/// Confines file actions to the workspace.
///
/// Paths pass four checks: deny list on the raw path, canonicalization,
/// deny list plus `restricted_paths` on the canonical path, and a workspace
/// prefix check. Relative paths are resolved against the workspace.
#[derive(Debug, Clone)]
pub struct PathGuard {
    workspace: PathBuf,
    deny_list: Vec<PathBuf>,
    restricted: Vec<PathBuf>,
}

const DENIED: &[&str] = &[
    ".ssh",
    ".env",
    ".aws/credentials",
    ".config/gcloud",
    "id_rsa",
    "id_ed25519",
    "id_dsa",
    ".gnupg",
    ".kube/config",
    "credentials",
    "private_key",
    ".npmrc",
    ".pypirc",
];

impl PathGuard {
    /// Guard rooted at `workspace`, which is created if missing
    pub fn new(workspace: &Path, restricted: &[PathBuf]) -> Result<Self, EngineError> {
        std::fs::create_dir_all(workspace)?;
        let workspace = workspace.canonicalize().map_err(|e| {
            EngineError::PathCanonicalization(workspace.to_path_buf(), e.to_string())
        })?;

        // Restricted entries that exist are compared in canonical form
        let restricted = restricted
            .iter()
            .map(|p| p.canonicalize().unwrap_or_else(|_| p.clone()))
            .collect();

        Ok(Self {
            workspace,
            deny_list: DENIED.iter().map(PathBuf::from).collect(),
            restricted,
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Resolve an existing path
    pub fn resolve(&self, raw: &str) -> Result<PathBuf, EngineError> {
        let path = self.absolute(raw);
        self.check_denied(&path)?;

        let canonical = path
            .canonicalize()
            .map_err(|e| EngineError::PathCanonicalization(path.clone(), e.to_string()))?;
        self.check_canonical(canonical)
    }

    /// Resolve a path that may not exist yet, for writes
    ///
    /// The nearest existing ancestor must pass [`resolve`](Self::resolve);
    /// the missing tail may only contain plain names.
    pub fn resolve_new(&self, raw: &str) -> Result<PathBuf, EngineError> {
        let path = self.absolute(raw);
        self.check_denied(&path)?;

        if path.exists() {
            let canonical = path
                .canonicalize()
                .map_err(|e| EngineError::PathCanonicalization(path.clone(), e.to_string()))?;
            return self.check_canonical(canonical);
        }

        let ancestor = path
            .ancestors()
            .skip(1)
            .find(|a| a.exists())
            .ok_or_else(|| EngineError::PathOutsideWorkspace(path.clone()))?;
        let tail = path
            .strip_prefix(ancestor)
            .map_err(|_| EngineError::PathOutsideWorkspace(path.clone()))?;

        if !tail.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(EngineError::PathOutsideWorkspace(path.clone()));
        }

        let canonical_ancestor = ancestor.canonicalize().map_err(|e| {
            EngineError::PathCanonicalization(ancestor.to_path_buf(), e.to_string())
        })?;
        self.check_canonical(canonical_ancestor.join(tail))
    }

    fn absolute(&self, raw: &str) -> PathBuf {
        let path = Path::new(raw.trim());
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workspace.join(path)
        }
    }

    fn check_canonical(&self, canonical: PathBuf) -> Result<PathBuf, EngineError> {
        self.check_denied(&canonical)?;

        if self.restricted.iter().any(|r| canonical.starts_with(r)) {
            return Err(EngineError::PathDenied(canonical));
        }

        if !canonical.starts_with(&self.workspace) {
            return Err(EngineError::PathOutsideWorkspace(canonical));
        }

        Ok(canonical)
    }

    fn check_denied(&self, path: &Path) -> Result<(), EngineError> {
        if self.is_denied(path) {
            return Err(EngineError::PathDenied(path.to_path_buf()));
        }
        Ok(())
    }

    fn is_denied(&self, path: &Path) -> bool {
        self.deny_list.iter().any(|denied| {
            path.ends_with(denied)
                || path
                    .components()
                    .any(|c| c.as_os_str() == denied.as_os_str())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn guard_in(temp: &TempDir) -> (PathGuard, PathBuf) {
        let workspace = temp.path().join("ws");
        let guard = PathGuard::new(&workspace, &[]).unwrap();
        (guard, workspace)
    }

    #[test]
    fn test_relative_path_resolves_inside_workspace() {
        let temp = TempDir::new().unwrap();
        let (guard, workspace) = guard_in(&temp);
        fs::write(workspace.join("notes.txt"), "hi").unwrap();

        let resolved = guard.resolve("notes.txt").unwrap();
        assert_eq!(resolved, workspace.join("notes.txt").canonicalize().unwrap());
    }

    #[test]
    fn test_traversal_is_outside_workspace() {
        let temp = TempDir::new().unwrap();
        let (guard, _) = guard_in(&temp);
        fs::write(temp.path().join("secret.txt"), "x").unwrap();

        let err = guard.resolve("../secret.txt").unwrap_err();
        assert!(matches!(err, EngineError::PathOutsideWorkspace(_)));
    }

    #[test]
    fn test_denied_component() {
        let temp = TempDir::new().unwrap();
        let (guard, _) = guard_in(&temp);

        let err = guard.resolve_new("project/.env").unwrap_err();
        assert!(matches!(err, EngineError::PathDenied(_)));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_to_denied_dir() {
        let temp = TempDir::new().unwrap();
        let (guard, workspace) = guard_in(&temp);
        let ssh = workspace.join(".ssh");
        fs::create_dir(&ssh).unwrap();
        std::os::unix::fs::symlink(&ssh, workspace.join("innocent")).unwrap();

        let err = guard.resolve("innocent").unwrap_err();
        assert!(matches!(err, EngineError::PathDenied(_)));
    }

    #[test]
    fn test_restricted_paths() {
        let temp = TempDir::new().unwrap();
        let workspace = temp.path().join("ws");
        fs::create_dir_all(workspace.join("private")).unwrap();
        let guard = PathGuard::new(&workspace, &[workspace.join("private")]).unwrap();

        let err = guard.resolve_new("private/plan.md").unwrap_err();
        assert!(matches!(err, EngineError::PathDenied(_)));
        assert!(guard.resolve_new("public/plan.md").is_ok());
    }

    #[test]
    fn test_new_path_tail_rejects_parent_dir() {
        let temp = TempDir::new().unwrap();
        let (guard, _) = guard_in(&temp);

        let err = guard.resolve_new("missing/../../escape.txt").unwrap_err();
        assert!(matches!(err, EngineError::PathOutsideWorkspace(_)));
    }
}
