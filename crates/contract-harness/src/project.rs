//! Project directory and specification file helpers.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::process::Command;
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

/// Resolve the directory mounted into the verifier.
///
/// An explicit directory must exist. Otherwise the enclosing git work tree
/// of the current directory is used.
pub async fn resolve_project_dir(explicit: Option<&Path>) -> HarnessResult<PathBuf> {
    if let Some(dir) = explicit {
        if !dir.is_dir() {
            return Err(HarnessError::ProjectRoot(format!(
                "{} is not a directory",
                dir.display()
            )));
        }
        return Ok(std::path::absolute(dir)?);
    }

    let output = Command::new("git")
        .args(["rev-parse", "--show-toplevel"])
        .output()
        .await
        .map_err(|e| HarnessError::ProjectRoot(format!("could not run git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HarnessError::ProjectRoot(stderr.trim().to_string()));
    }

    let dir = PathBuf::from(String::from_utf8_lossy(&output.stdout).trim());
    debug!(project_dir = %dir.display(), "resolved project directory from git");
    Ok(dir)
}

/// SHA-256 of the specification file, if it can be read.
pub fn spec_digest(project_dir: &Path, spec_file: &str) -> Option<String> {
    let content = std::fs::read(project_dir.join(spec_file)).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&content);
    Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_explicit_dir_is_used() {
        let dir = tempdir().unwrap();
        let resolved = resolve_project_dir(Some(dir.path())).await.unwrap();
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with(dir.path().file_name().unwrap()));
    }

    #[tokio::test]
    async fn test_missing_explicit_dir_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let err = resolve_project_dir(Some(&missing)).await.unwrap_err();
        assert!(matches!(err, HarnessError::ProjectRoot(_)));
    }

    #[test]
    fn test_spec_digest() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("products_api.yaml"), b"openapi: 3.0.0\n").unwrap();

        let a = spec_digest(dir.path(), "products_api.yaml").unwrap();
        let b = spec_digest(dir.path(), "products_api.yaml").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);

        std::fs::write(dir.path().join("products_api.yaml"), b"openapi: 3.1.0\n").unwrap();
        let c = spec_digest(dir.path(), "products_api.yaml").unwrap();
        assert_ne!(a, c);

        assert!(spec_digest(dir.path(), "missing.yaml").is_none());
    }
}
