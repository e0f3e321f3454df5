use std::sync::Arc;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::info;

use super::content::ContentGenerator;
use super::diagram::{DiagramLoop, SeedCandidate};
use super::llm::{LlmGateway, ModelClient};
use super::mermaid::DiagramMode;
use super::state::{AnalysisResults, RunRecord, RunStatus};
use super::storage::AnalysisStore;
use super::workflow::WorkflowRunner;
use crate::config::Config;
use crate::error::{CartographError, Result};

/// What `start` hands back to the caller.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub run_id: String,
    pub status: RunStatus,
    pub cached: bool,
    pub cached_at: Option<DateTime<Utc>>,
}

/// The public analysis surface: run lifecycle, cached starts, result
/// retrieval, and on-demand diagram generation and correction.
pub struct AnalysisService {
    store: Arc<dyn AnalysisStore>,
    content: Arc<ContentGenerator>,
    runner: Arc<WorkflowRunner>,
    config: Config,
}

impl AnalysisService {
    pub fn new(
        config: Config,
        store: Arc<dyn AnalysisStore>,
        client: Arc<dyn ModelClient>,
    ) -> Self {
        let gateway = Arc::new(LlmGateway::new(client, config.llm.clone()));
        let content = Arc::new(ContentGenerator::new(
            gateway,
            config.analysis.component_count,
        ));
        let runner = Arc::new(WorkflowRunner::new(
            store.clone(),
            content.clone(),
            config.clone(),
        ));
        Self {
            store,
            content,
            runner,
            config,
        }
    }

    /// Start an analysis, reusing a completed run for the same URL unless
    /// `force_refresh` is set. New runs are scheduled in the background;
    /// callers poll [`AnalysisService::status`].
    pub async fn start(&self, repo_url: &str, force_refresh: bool) -> Result<StartOutcome> {
        if let Some(existing) = self.check_existing(repo_url, force_refresh).await? {
            return Ok(existing);
        }

        let run_id = generate_run_id(repo_url);
        self.store.create_run(repo_url, &run_id).await?;
        info!("Scheduled analysis {run_id} for {repo_url}");

        let runner = self.runner.clone();
        let id = run_id.clone();
        let url = repo_url.to_string();
        tokio::spawn(async move {
            let _ = runner.execute(&id, &url).await;
        });

        Ok(StartOutcome {
            run_id,
            status: RunStatus::Pending,
            cached: false,
            cached_at: None,
        })
    }

    /// Same cache semantics as [`AnalysisService::start`], but the workflow
    /// runs inline. Used by the CLI.
    pub async fn run_to_completion(
        &self,
        repo_url: &str,
        force_refresh: bool,
    ) -> Result<(StartOutcome, AnalysisResults)> {
        if let Some(existing) = self.check_existing(repo_url, force_refresh).await? {
            match existing.status {
                RunStatus::Completed => {
                    let results = self.result(&existing.run_id).await?;
                    return Ok((existing, results));
                }
                _ => return Err(CartographError::NotReady(existing.run_id)),
            }
        }

        let run_id = generate_run_id(repo_url);
        self.store.create_run(repo_url, &run_id).await?;
        let results = self.runner.execute(&run_id, repo_url).await?;
        Ok((
            StartOutcome {
                run_id,
                status: RunStatus::Completed,
                cached: false,
                cached_at: None,
            },
            results,
        ))
    }

    /// Fast status read for polling callers.
    pub async fn status(&self, run_id: &str) -> Result<RunRecord> {
        self.store
            .load_run(run_id)
            .await?
            .ok_or_else(|| CartographError::NotFound(run_id.to_string()))
    }

    /// Full results of a completed run.
    pub async fn result(&self, run_id: &str) -> Result<AnalysisResults> {
        let record = self.status(run_id).await?;
        if record.status != RunStatus::Completed {
            return Err(CartographError::NotReady(run_id.to_string()));
        }
        self.store
            .load_results(run_id)
            .await?
            .ok_or_else(|| CartographError::NotFound(run_id.to_string()))
    }

    /// Generate one diagram mode from the stored analysis data.
    ///
    /// Idempotent against a successful prior call: a stored non-empty
    /// artifact is returned without recomputation.
    pub async fn generate_diagram(&self, run_id: &str, mode: DiagramMode) -> Result<String> {
        let results = self.result(run_id).await?;
        let stored = results.artifacts.diagram(mode);
        if !stored.is_empty() {
            return Ok(stored.to_string());
        }

        let outcome = self
            .diagram_loop()
            .run(
                mode,
                &results.metrics.dependency_analysis,
                &results.metrics.graph,
                &results.artifacts.architecture_md,
                &results.artifacts.mermaid_folders,
                None,
            )
            .await;

        if outcome.quota_hit && outcome.diagram.is_empty() {
            return Err(CartographError::QuotaExhausted {
                attempted_models: self.config.llm.model_fallback_order.clone(),
            });
        }

        self.store
            .update_artifact(run_id, mode.artifact_key(), &outcome.diagram)
            .await?;
        Ok(outcome.diagram)
    }

    /// Feed a broken candidate (typically from a downstream renderer
    /// failure) into the correction path of the diagram loop and persist
    /// whatever it settles on.
    pub async fn correct_diagram(
        &self,
        run_id: &str,
        mode: DiagramMode,
        broken_code: &str,
        error_message: &str,
    ) -> Result<String> {
        let results = self.result(run_id).await?;

        let outcome = self
            .diagram_loop()
            .run(
                mode,
                &results.metrics.dependency_analysis,
                &results.metrics.graph,
                &results.artifacts.architecture_md,
                &results.artifacts.mermaid_folders,
                Some(SeedCandidate {
                    diagram: broken_code.to_string(),
                    error_message: error_message.to_string(),
                }),
            )
            .await;

        if outcome.diagram.trim().is_empty() {
            return Err(CartographError::Validation(
                "correction produced an empty diagram".to_string(),
            ));
        }

        self.store
            .update_artifact(run_id, mode.artifact_key(), &outcome.diagram)
            .await?;
        Ok(outcome.diagram)
    }

    fn diagram_loop(&self) -> DiagramLoop {
        DiagramLoop::new(
            self.content.clone(),
            self.config.analysis.max_diagram_attempts,
        )
    }

    async fn check_existing(
        &self,
        repo_url: &str,
        force_refresh: bool,
    ) -> Result<Option<StartOutcome>> {
        if force_refresh {
            return Ok(None);
        }
        let Some(existing) = self.store.lookup_latest_by_url(repo_url).await? else {
            return Ok(None);
        };

        match existing.status {
            RunStatus::Completed => {
                info!(
                    "Found completed analysis {} for {repo_url}",
                    existing.run_id
                );
                Ok(Some(StartOutcome {
                    run_id: existing.run_id,
                    status: RunStatus::Completed,
                    cached: true,
                    cached_at: Some(existing.updated_at),
                }))
            }
            RunStatus::Pending | RunStatus::Started => Ok(Some(StartOutcome {
                run_id: existing.run_id,
                status: existing.status,
                cached: false,
                cached_at: None,
            })),
            // A failed prior run gets a fresh attempt.
            RunStatus::Failed => Ok(None),
        }
    }
}

/// Stable-enough run identifier: url + creation instant, hashed.
fn generate_run_id(repo_url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(repo_url.as_bytes());
    hasher.update(
        Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes(),
    );
    let digest = hasher.finalize();
    digest[..6].iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_ids_are_short_hex_and_distinct_per_url() {
        let a = generate_run_id("https://example.com/a.git");
        let b = generate_run_id("https://example.com/b.git");
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
