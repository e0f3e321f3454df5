use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::state::{AnalysisResults, RunRecord, RunStatus};
use crate::error::{CartographError, Result};

/// Persistence seam for the engine. The core writes runs and results
/// through this trait; any backend failure is surfaced as
/// [`CartographError::Storage`], which is fatal to a run.
#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn create_run(&self, repo_url: &str, run_id: &str) -> Result<RunRecord>;

    async fn update_status(
        &self,
        run_id: &str,
        status: RunStatus,
        progress: Option<&str>,
        message: Option<&str>,
    ) -> Result<()>;

    /// Idempotent per run.
    async fn save_results(&self, run_id: &str, results: &AnalysisResults) -> Result<()>;

    async fn load_results(&self, run_id: &str) -> Result<Option<AnalysisResults>>;

    async fn load_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Most recently created run for a repository URL.
    async fn lookup_latest_by_url(&self, repo_url: &str) -> Result<Option<RunRecord>>;

    /// Replace a single artifact on stored results.
    async fn update_artifact(&self, run_id: &str, key: &str, diagram: &str) -> Result<()>;
}

fn set_artifact(results: &mut AnalysisResults, key: &str, diagram: &str) -> Result<()> {
    let slot = match key {
        "architecture_md" => &mut results.artifacts.architecture_md,
        "mermaid_modules" => &mut results.artifacts.mermaid_modules,
        "mermaid_modules_simple" => &mut results.artifacts.mermaid_modules_simple,
        "mermaid_modules_balanced" => &mut results.artifacts.mermaid_modules_balanced,
        "mermaid_modules_detailed" => &mut results.artifacts.mermaid_modules_detailed,
        "mermaid_folders" => &mut results.artifacts.mermaid_folders,
        other => {
            return Err(CartographError::Storage(format!(
                "unknown artifact key: {other}"
            )))
        }
    };
    *slot = diagram.to_string();
    Ok(())
}

/// In-memory store used by tests and single-shot runs.
#[derive(Default)]
pub struct MemoryStore {
    runs: RwLock<HashMap<String, RunRecord>>,
    results: RwLock<HashMap<String, AnalysisResults>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn create_run(&self, repo_url: &str, run_id: &str) -> Result<RunRecord> {
        let now = Utc::now();
        let record = RunRecord {
            run_id: run_id.to_string(),
            repo_url: repo_url.to_string(),
            status: RunStatus::Pending,
            progress: "Analysis request received, preparing to start...".to_string(),
            message: None,
            created_at: now,
            updated_at: now,
        };
        self.runs
            .write()
            .await
            .insert(run_id.to_string(), record.clone());
        Ok(record)
    }

    async fn update_status(
        &self,
        run_id: &str,
        status: RunStatus,
        progress: Option<&str>,
        message: Option<&str>,
    ) -> Result<()> {
        let mut runs = self.runs.write().await;
        let record = runs
            .get_mut(run_id)
            .ok_or_else(|| CartographError::Storage(format!("run {run_id} not found")))?;
        record.status = status;
        if let Some(progress) = progress {
            record.progress = progress.to_string();
        }
        if let Some(message) = message {
            record.message = Some(message.to_string());
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn save_results(&self, run_id: &str, results: &AnalysisResults) -> Result<()> {
        self.results
            .write()
            .await
            .insert(run_id.to_string(), results.clone());
        Ok(())
    }

    async fn load_results(&self, run_id: &str) -> Result<Option<AnalysisResults>> {
        Ok(self.results.read().await.get(run_id).cloned())
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.runs.read().await.get(run_id).cloned())
    }

    async fn lookup_latest_by_url(&self, repo_url: &str) -> Result<Option<RunRecord>> {
        Ok(self
            .runs
            .read()
            .await
            .values()
            .filter(|r| r.repo_url == repo_url)
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn update_artifact(&self, run_id: &str, key: &str, diagram: &str) -> Result<()> {
        let mut results = self.results.write().await;
        let entry = results
            .get_mut(run_id)
            .ok_or_else(|| CartographError::Storage(format!("no results for run {run_id}")))?;
        set_artifact(entry, key, diagram)
    }
}

/// JSON-file store backing the CLI, so `status`/`result`/`diagram` work
/// across invocations. One file per run under `<root>/runs` and
/// `<root>/results`.
pub struct JsonStore {
    runs_dir: PathBuf,
    results_dir: PathBuf,
}

impl JsonStore {
    pub fn open(root: &std::path::Path) -> Result<Self> {
        let runs_dir = root.join("runs");
        let results_dir = root.join("results");
        std::fs::create_dir_all(&runs_dir)?;
        std::fs::create_dir_all(&results_dir)?;
        Ok(Self {
            runs_dir,
            results_dir,
        })
    }

    fn run_path(&self, run_id: &str) -> PathBuf {
        self.runs_dir.join(format!("{run_id}.json"))
    }

    fn results_path(&self, run_id: &str) -> PathBuf {
        self.results_dir.join(format!("{run_id}.json"))
    }

    fn read_run(&self, path: &std::path::Path) -> Result<RunRecord> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| CartographError::Storage(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map_err(|e| CartographError::Storage(format!("{}: {e}", path.display())))
    }

    fn write_json<T: serde::Serialize>(&self, path: &std::path::Path, value: &T) -> Result<()> {
        let text = serde_json::to_string_pretty(value)
            .map_err(|e| CartographError::Storage(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| CartographError::Storage(format!("{}: {e}", path.display())))
    }
}

#[async_trait]
impl AnalysisStore for JsonStore {
    async fn create_run(&self, repo_url: &str, run_id: &str) -> Result<RunRecord> {
        let now = Utc::now();
        let record = RunRecord {
            run_id: run_id.to_string(),
            repo_url: repo_url.to_string(),
            status: RunStatus::Pending,
            progress: "Analysis request received, preparing to start...".to_string(),
            message: None,
            created_at: now,
            updated_at: now,
        };
        self.write_json(&self.run_path(run_id), &record)?;
        Ok(record)
    }

    async fn update_status(
        &self,
        run_id: &str,
        status: RunStatus,
        progress: Option<&str>,
        message: Option<&str>,
    ) -> Result<()> {
        let mut record = self.read_run(&self.run_path(run_id))?;
        record.status = status;
        if let Some(progress) = progress {
            record.progress = progress.to_string();
        }
        if let Some(message) = message {
            record.message = Some(message.to_string());
        }
        record.updated_at = Utc::now();
        self.write_json(&self.run_path(run_id), &record)
    }

    async fn save_results(&self, run_id: &str, results: &AnalysisResults) -> Result<()> {
        self.write_json(&self.results_path(run_id), results)
    }

    async fn load_results(&self, run_id: &str) -> Result<Option<AnalysisResults>> {
        let path = self.results_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .map_err(|e| CartographError::Storage(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| CartographError::Storage(format!("{}: {e}", path.display())))
    }

    async fn load_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        let path = self.run_path(run_id);
        if !path.exists() {
            return Ok(None);
        }
        self.read_run(&path).map(Some)
    }

    async fn lookup_latest_by_url(&self, repo_url: &str) -> Result<Option<RunRecord>> {
        let mut latest: Option<RunRecord> = None;
        let entries = std::fs::read_dir(&self.runs_dir)
            .map_err(|e| CartographError::Storage(e.to_string()))?;
        for entry in entries.flatten() {
            let Ok(record) = self.read_run(&entry.path()) else {
                continue;
            };
            if record.repo_url == repo_url
                && latest
                    .as_ref()
                    .map_or(true, |l| record.created_at > l.created_at)
            {
                latest = Some(record);
            }
        }
        Ok(latest)
    }

    async fn update_artifact(&self, run_id: &str, key: &str, diagram: &str) -> Result<()> {
        let mut results = self
            .load_results(run_id)
            .await?
            .ok_or_else(|| CartographError::Storage(format!("no results for run {run_id}")))?;
        set_artifact(&mut results, key, diagram)?;
        self.save_results(run_id, &results).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_tracks_latest_run_per_url() {
        let store = MemoryStore::new();
        store.create_run("https://example.com/r.git", "run-1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.create_run("https://example.com/r.git", "run-2").await.unwrap();

        let latest = store
            .lookup_latest_by_url("https://example.com/r.git")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.run_id, "run-2");
        assert!(store
            .lookup_latest_by_url("https://example.com/other.git")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unknown_artifact_key_is_rejected() {
        let store = MemoryStore::new();
        store.create_run("u", "run-1").await.unwrap();
        let err = store.update_artifact("run-1", "x", "y").await.unwrap_err();
        assert!(matches!(err, CartographError::Storage(_)));
    }

    #[tokio::test]
    async fn json_store_round_trips_run_records() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = JsonStore::open(dir.path()).unwrap();

        store.create_run("https://example.com/r.git", "run-1").await.unwrap();
        store
            .update_status("run-1", RunStatus::Completed, Some("done"), None)
            .await
            .unwrap();

        let record = store.load_run("run-1").await.unwrap().unwrap();
        assert_eq!(record.status, RunStatus::Completed);
        assert_eq!(record.progress, "done");
    }
}
