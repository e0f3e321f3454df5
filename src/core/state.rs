use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classify::DependencyAnalysis;
use super::content::ComponentRecord;
use super::extract::Edge;
use super::graph::{CentralFile, DependencyGraph};
use super::mermaid::DiagramMode;
use super::scanner::FileRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Started,
    Completed,
    Failed,
}

impl RunStatus {
    /// Once completed or failed, a run never changes status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Started => "started",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analysis run as persistence sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub repo_url: String,
    pub status: RunStatus,
    /// Human-readable progress label, updated on stage entry
    pub progress: String,
    /// Machine-readable failure reason or completion note
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoInfo {
    pub url: String,
    pub commit_sha: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenBudget {
    pub embed_calls: u32,
    pub gen_calls: u32,
    pub chunks: u32,
}

/// All diagram and markdown artifacts of a run. Missing artifacts are empty
/// strings in the persisted form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Artifacts {
    pub architecture_md: String,
    pub mermaid_modules: String,
    pub mermaid_modules_simple: String,
    pub mermaid_modules_balanced: String,
    pub mermaid_modules_detailed: String,
    pub mermaid_folders: String,
}

impl Artifacts {
    pub fn diagram(&self, mode: DiagramMode) -> &str {
        match mode {
            DiagramMode::Overview => &self.mermaid_modules_simple,
            DiagramMode::Balanced => &self.mermaid_modules_balanced,
            DiagramMode::Detailed => &self.mermaid_modules_detailed,
        }
    }

    pub fn set_diagram(&mut self, mode: DiagramMode, diagram: String) {
        match mode {
            DiagramMode::Overview => self.mermaid_modules_simple = diagram,
            DiagramMode::Balanced => self.mermaid_modules_balanced = diagram,
            DiagramMode::Detailed => self.mermaid_modules_detailed = diagram,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsBundle {
    pub central_files: Vec<CentralFile>,
    pub graph: DependencyGraph,
    pub dependency_analysis: DependencyAnalysis,
}

/// The persisted artifact of a completed run: what `result` returns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResults {
    pub status: RunStatus,
    pub repo: RepoInfo,
    pub language_stats: BTreeMap<String, f64>,
    pub loc_total: usize,
    pub file_count: usize,
    pub metrics: MetricsBundle,
    pub components: Vec<ComponentRecord>,
    pub artifacts: Artifacts,
    pub token_budget: TokenBudget,
    /// Error-log entries of a completed run, shown to callers as warnings
    pub warnings: Vec<String>,
}

/// Append-only error log shared across concurrent stages.
///
/// The one piece of run state multiple subtasks touch; appends are
/// lock-protected and the lock is held only for the push.
#[derive(Clone, Default)]
pub struct ErrorLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ErrorLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, entry: impl Into<String>) {
        let entry = entry.into();
        tracing::warn!("run error: {entry}");
        self.entries.lock().expect("error log poisoned").push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().expect("error log poisoned").clone()
    }
}

/// Workflow-internal run state. Each stage writes only the fields it
/// declares; later stages check presence before use.
pub struct RunState {
    pub run_id: String,
    pub repo_url: String,
    pub commit_sha: Option<String>,

    // Static prelude outputs (S1)
    pub files: Option<Vec<FileRecord>>,
    pub edges: Option<Vec<Edge>>,
    pub graph: Option<DependencyGraph>,
    pub dependency_analysis: Option<DependencyAnalysis>,
    pub language_stats: Option<BTreeMap<String, f64>>,
    pub folder_diagram: Option<String>,
    pub modules_diagram: Option<String>,

    // Narrative (S2)
    pub narrative: Option<String>,

    // Parallel outputs (S3) land in disjoint fields
    pub components: Option<Vec<ComponentRecord>>,
    pub diagram_overview: Option<String>,
    pub diagram_balanced: Option<String>,
    pub diagram_detailed: Option<String>,

    pub errors: ErrorLog,
}

impl RunState {
    pub fn new(run_id: &str, repo_url: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            repo_url: repo_url.to_string(),
            commit_sha: None,
            files: None,
            edges: None,
            graph: None,
            dependency_analysis: None,
            language_stats: None,
            folder_diagram: None,
            modules_diagram: None,
            narrative: None,
            components: None,
            diagram_overview: None,
            diagram_balanced: None,
            diagram_detailed: None,
            errors: ErrorLog::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_appends_are_visible_across_clones() {
        let log = ErrorLog::new();
        let cloned = log.clone();
        cloned.append("diagram:detailed: quota_exhausted");
        assert_eq!(log.entries(), vec!["diagram:detailed: quota_exhausted"]);
    }

    #[test]
    fn terminal_statuses_are_completed_and_failed() {
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Started.is_terminal());
    }

    #[test]
    fn artifact_keys_map_to_diagram_modes() {
        let mut artifacts = Artifacts::default();
        artifacts.set_diagram(DiagramMode::Overview, "flowchart TB".to_string());
        assert_eq!(artifacts.diagram(DiagramMode::Overview), "flowchart TB");
        assert_eq!(artifacts.mermaid_modules_simple, "flowchart TB");
    }
}
