use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{CartographError, Result};

/// A shallow clone of the analyzed repository.
///
/// The directory is owned by the workspace for the duration of the run and
/// removed on `Drop`, so cleanup happens on every exit path, including task
/// cancellation and panics unwinding through the runner.
#[derive(Debug)]
pub struct RepoWorkspace {
    root: PathBuf,
    pub commit_sha: String,
}

impl RepoWorkspace {
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Drop for RepoWorkspace {
    fn drop(&mut self) {
        if self.root.exists() {
            match std::fs::remove_dir_all(&self.root) {
                Ok(()) => info!("Cleaned up workspace {}", self.root.display()),
                Err(e) => warn!("Failed to clean up {}: {}", self.root.display(), e),
            }
        }
    }
}

/// Clones repositories into per-run workspaces.
pub struct RepoFetcher {
    work_dir: PathBuf,
}

impl RepoFetcher {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            work_dir: work_dir.to_path_buf(),
        }
    }

    /// Shallow-clone `repo_url` (single commit) into a workspace unique to
    /// `run_id` and resolve the checked-out commit.
    pub async fn fetch(&self, repo_url: &str, run_id: &str) -> Result<RepoWorkspace> {
        std::fs::create_dir_all(&self.work_dir)?;
        let target = self.work_dir.join(run_id);
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }

        info!("Cloning {} into {}", repo_url, target.display());
        let clone = Command::new("git")
            .args(["clone", "--depth", "1", repo_url])
            .arg(&target)
            .output()
            .await
            .map_err(|e| CartographError::Fetch(format!("failed to spawn git: {e}")))?;

        if !clone.status.success() {
            let stderr = String::from_utf8_lossy(&clone.stderr);
            return Err(CartographError::Fetch(format!(
                "git clone failed for {repo_url}: {}",
                stderr.trim()
            )));
        }

        // The directory exists from here on; the workspace guard owns it even
        // if rev-parse fails below.
        let mut workspace = RepoWorkspace {
            root: target,
            commit_sha: String::new(),
        };

        let rev = Command::new("git")
            .args(["-C"])
            .arg(workspace.root())
            .args(["rev-parse", "HEAD"])
            .output()
            .await
            .map_err(|e| CartographError::Fetch(format!("failed to spawn git: {e}")))?;

        if !rev.status.success() {
            return Err(CartographError::Fetch(format!(
                "git rev-parse failed: {}",
                String::from_utf8_lossy(&rev.stderr).trim()
            )));
        }

        workspace.commit_sha = String::from_utf8_lossy(&rev.stdout).trim().to_string();
        Ok(workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_removes_directory_on_drop() {
        let base = tempfile::TempDir::new().unwrap();
        let root = base.path().join("run-1");
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(root.join("nested/file.py"), "x = 1\n").unwrap();

        {
            let _workspace = RepoWorkspace {
                root: root.clone(),
                commit_sha: "abc".to_string(),
            };
            assert!(root.exists());
        }
        assert!(!root.exists());
    }

    #[tokio::test]
    async fn fetch_reports_unreachable_remote_as_fetch_error() {
        let base = tempfile::TempDir::new().unwrap();
        let fetcher = RepoFetcher::new(base.path());
        let err = fetcher
            .fetch("file:///nonexistent/definitely-not-a-repo", "run-x")
            .await
            .unwrap_err();
        assert!(matches!(err, CartographError::Fetch(_)));
    }
}
