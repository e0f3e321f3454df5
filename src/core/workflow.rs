use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{info, warn};

use super::classify::DependencyAnalysis;
use super::content::{select_excerpts, ContentGenerator};
use super::diagram::DiagramLoop;
use super::extract::ImportExtractor;
use super::fetcher::RepoFetcher;
use super::graph::DependencyGraph;
use super::mermaid::{folders_mermaid, modules_mermaid, DiagramMode};
use super::scanner::{language_stats, loc_total, FileScanner};
use super::state::{
    AnalysisResults, Artifacts, MetricsBundle, RepoInfo, RunState, RunStatus, TokenBudget,
};
use super::storage::AnalysisStore;
use crate::config::Config;
use crate::error::{CartographError, ErrorSeverity, Result};

/// Narrative sentinel for repositories with no supported files.
pub const EMPTY_REPO_NARRATIVE: &str = "No supported files found in repository.";

const NARRATIVE_EXCERPT_COUNT: usize = 12;

/// Shared, read-only inputs for the parallel fan-out.
struct FanOutInputs {
    analysis: DependencyAnalysis,
    graph: DependencyGraph,
    narrative: String,
    folder_diagram: String,
    top_files: Vec<String>,
    excerpts: Vec<(String, String)>,
}

type Slot<T> = Arc<Mutex<Option<T>>>;

/// Staged state machine driving one analysis run.
///
/// S1 static prelude and S2 narrative run sequentially; S3 fans out the
/// component extraction and the three diagram modes onto a task set with a
/// join barrier; S4 persists and sets the terminal status. Each stage is
/// error-isolated: fatal errors end the run, degrading errors land in the
/// error log and leave the stage output unset.
pub struct WorkflowRunner {
    store: Arc<dyn AnalysisStore>,
    content: Arc<ContentGenerator>,
    config: Config,
}

impl WorkflowRunner {
    pub fn new(store: Arc<dyn AnalysisStore>, content: Arc<ContentGenerator>, config: Config) -> Self {
        Self {
            store,
            content,
            config,
        }
    }

    /// Run to the terminal status, recording failures on the run record
    /// with a machine-readable reason before surfacing them.
    pub async fn execute(&self, run_id: &str, repo_url: &str) -> Result<AnalysisResults> {
        match self.run(run_id, repo_url).await {
            Ok(results) => {
                info!("Analysis {run_id} completed");
                Ok(results)
            }
            Err(e) => {
                warn!("Analysis {run_id} failed: {e}");
                let _ = self
                    .store
                    .update_status(
                        run_id,
                        RunStatus::Failed,
                        Some(&format!("Analysis failed: {e}")),
                        Some(e.reason()),
                    )
                    .await;
                Err(e)
            }
        }
    }

    pub async fn run(&self, run_id: &str, repo_url: &str) -> Result<AnalysisResults> {
        let mut state = RunState::new(run_id, repo_url);

        // S1: static prelude. Any failure here is fatal to the run. The
        // workspace guard lives until S4, covering cancellation and panics.
        self.enter_stage(run_id, "Cloning repository and performing static analysis...")
            .await?;
        let fetcher = RepoFetcher::new(&self.config.workspace.work_dir);
        let workspace = fetcher.fetch(repo_url, run_id).await?;
        state.commit_sha = Some(workspace.commit_sha.clone());
        self.static_prelude(&mut state, workspace.root())?;

        let files = state.files.as_ref().expect("prelude sets files");
        if files.is_empty() {
            info!("No supported files in {repo_url}, skipping LLM stages");
            state.narrative = Some(EMPTY_REPO_NARRATIVE.to_string());
            state.components = Some(Vec::new());
        } else {
            // One deadline bounds the whole LLM-involving phase (S2 + S3).
            let phase_deadline =
                Instant::now() + Duration::from_secs(self.config.analysis.run_deadline_secs);

            let graph = state.graph.as_ref().expect("prelude sets graph");
            let top_files: Vec<String> = graph
                .top_files
                .iter()
                .take(self.config.analysis.top_files)
                .cloned()
                .collect();
            let excerpts = select_excerpts(files, &top_files, NARRATIVE_EXCERPT_COUNT);

            // S2: narrative. Quota exhaustion here fails the run; other
            // LLM errors degrade it.
            self.enter_stage(run_id, "Generating architecture overview using AI...")
                .await?;
            let stats = state.language_stats.clone().unwrap_or_default();
            let narrative_call = self.content.generate_narrative(&stats, &top_files, &excerpts);
            match timeout_at(phase_deadline, narrative_call).await {
                Ok(Ok(markdown)) => state.narrative = Some(markdown),
                Ok(Err(e)) => match e.severity() {
                    ErrorSeverity::Fatal => return Err(e),
                    ErrorSeverity::Degrading => state.errors.append(format!("narrative: {e}")),
                },
                Err(_) => state
                    .errors
                    .append("narrative: run deadline exceeded, skipping LLM stages"),
            }

            // S3: parallel fan-out behind a join barrier.
            self.enter_stage(run_id, "Extracting components and generating diagrams...")
                .await?;
            self.fan_out(&mut state, top_files, excerpts, phase_deadline)
                .await;
        }

        // S4: finalize, persist, set the terminal status.
        self.enter_stage(run_id, "Finalizing analysis and generating summary...")
            .await?;
        let results = self.finalize(&state);
        self.store.save_results(run_id, &results).await?;
        self.store
            .update_status(
                run_id,
                RunStatus::Completed,
                Some("Analysis completed successfully!"),
                None,
            )
            .await?;

        drop(workspace);
        Ok(results)
    }

    /// Clone-free synchronous prelude over the workspace: scan, extract,
    /// build graph, classify, render the deterministic diagrams.
    fn static_prelude(&self, state: &mut RunState, root: &Path) -> Result<()> {
        let scanner = FileScanner::new(&self.config.analysis);
        let files = scanner.scan(root)?;

        let mut extractor =
            ImportExtractor::new().map_err(|e| CartographError::Scan(e.to_string()))?;
        let edges = extractor
            .extract(root, &files)
            .map_err(|e| CartographError::Scan(e.to_string()))?;

        let graph = DependencyGraph::build(&files, &edges);
        let analysis = DependencyAnalysis::build(&edges, files.len());
        let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();

        state.language_stats = Some(language_stats(&files));
        state.folder_diagram = Some(folders_mermaid(&paths));
        state.modules_diagram = Some(modules_mermaid(&graph.edges));
        state.files = Some(files);
        state.edges = Some(edges);
        state.graph = Some(graph);
        state.dependency_analysis = Some(analysis);
        Ok(())
    }

    /// Dispatch S3a-S3d onto a task set and wait for all of them, bounded
    /// by the phase deadline. Subtasks write disjoint output slots and
    /// append to the shared error log; on deadline expiry the stragglers
    /// are cancelled and whatever finished is kept.
    async fn fan_out(
        &self,
        state: &mut RunState,
        top_files: Vec<String>,
        excerpts: Vec<(String, String)>,
        phase_deadline: Instant,
    ) {
        let inputs = Arc::new(FanOutInputs {
            analysis: state.dependency_analysis.clone().unwrap_or_default(),
            graph: state.graph.clone().unwrap_or_default(),
            narrative: state.narrative.clone().unwrap_or_default(),
            folder_diagram: state.folder_diagram.clone().unwrap_or_default(),
            top_files,
            excerpts,
        });

        let components_slot: Slot<Vec<super::content::ComponentRecord>> = Arc::default();
        let overview_slot: Slot<String> = Arc::default();
        let balanced_slot: Slot<String> = Arc::default();
        let detailed_slot: Slot<String> = Arc::default();

        let mut tasks: JoinSet<()> = JoinSet::new();

        {
            let content = self.content.clone();
            let inputs = inputs.clone();
            let slot = components_slot.clone();
            let errors = state.errors.clone();
            let count = self.config.analysis.component_count;
            tasks.spawn(async move {
                let chosen = &inputs.top_files[..count.min(inputs.top_files.len())];
                match content.extract_components(chosen, &inputs.excerpts).await {
                    Ok(components) => {
                        *slot.lock().expect("slot poisoned") = Some(components);
                    }
                    Err(CartographError::QuotaExhausted { .. }) => {
                        errors.append("components: quota_exhausted");
                    }
                    Err(e) => errors.append(format!("components: {e}")),
                }
            });
        }

        for (mode, slot) in [
            (DiagramMode::Overview, overview_slot.clone()),
            (DiagramMode::Balanced, balanced_slot.clone()),
            (DiagramMode::Detailed, detailed_slot.clone()),
        ] {
            let hammer = DiagramLoop::new(
                self.content.clone(),
                self.config.analysis.max_diagram_attempts,
            );
            let inputs = inputs.clone();
            let errors = state.errors.clone();
            tasks.spawn(async move {
                let outcome = hammer
                    .run(
                        mode,
                        &inputs.analysis,
                        &inputs.graph,
                        &inputs.narrative,
                        &inputs.folder_diagram,
                        None,
                    )
                    .await;
                if outcome.quota_hit {
                    errors.append(format!("diagram:{mode}: quota_exhausted"));
                }
                if outcome.exhausted {
                    errors.append(format!(
                        "diagram:{mode}: correction exhausted, {} error(s) remain",
                        outcome.remaining_errors.len()
                    ));
                }
                *slot.lock().expect("slot poisoned") = Some(outcome.diagram);
            });
        }

        let barrier = async {
            while let Some(joined) = tasks.join_next().await {
                if let Err(join_error) = joined {
                    // Programming errors must not be swallowed.
                    if join_error.is_panic() {
                        std::panic::resume_unwind(join_error.into_panic());
                    }
                }
            }
        };
        if timeout_at(phase_deadline, barrier).await.is_err() {
            tasks.shutdown().await;
            state
                .errors
                .append("run deadline exceeded; remaining subtasks cancelled");
        }

        state.components = components_slot.lock().expect("slot poisoned").take();
        state.diagram_overview = overview_slot.lock().expect("slot poisoned").take();
        state.diagram_balanced = balanced_slot.lock().expect("slot poisoned").take();
        state.diagram_detailed = detailed_slot.lock().expect("slot poisoned").take();
    }

    /// Convert the run state into the persisted artifact; unset optional
    /// outputs become empty values.
    fn finalize(&self, state: &RunState) -> AnalysisResults {
        let files = state.files.clone().unwrap_or_default();
        let graph = state.graph.clone().unwrap_or_default();
        let components = state.components.clone().unwrap_or_default();

        let artifacts = Artifacts {
            architecture_md: state.narrative.clone().unwrap_or_default(),
            mermaid_modules: state.modules_diagram.clone().unwrap_or_default(),
            mermaid_modules_simple: state.diagram_overview.clone().unwrap_or_default(),
            mermaid_modules_balanced: state.diagram_balanced.clone().unwrap_or_default(),
            mermaid_modules_detailed: state.diagram_detailed.clone().unwrap_or_default(),
            mermaid_folders: state.folder_diagram.clone().unwrap_or_default(),
        };

        AnalysisResults {
            status: RunStatus::Completed,
            repo: RepoInfo {
                url: state.repo_url.clone(),
                commit_sha: state.commit_sha.clone().unwrap_or_default(),
            },
            language_stats: state.language_stats.clone().unwrap_or_default(),
            loc_total: loc_total(&files),
            file_count: files.len(),
            metrics: MetricsBundle {
                central_files: graph.central_files(50),
                graph,
                dependency_analysis: state.dependency_analysis.clone().unwrap_or_default(),
            },
            token_budget: TokenBudget {
                embed_calls: 0,
                gen_calls: 1 + components.len() as u32,
                chunks: 0,
            },
            components,
            artifacts,
            warnings: state.errors.entries(),
        }
    }

    /// Stage-entry bookkeeping: progress label through the store.
    async fn enter_stage(&self, run_id: &str, progress: &str) -> Result<()> {
        info!("{run_id}: {progress}");
        self.store
            .update_status(run_id, RunStatus::Started, Some(progress), None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_log_crosses_task_boundaries() {
        fn check<T: Send + Sync + Clone>() {}
        check::<super::super::state::ErrorLog>();
    }

    #[test]
    fn finalize_fills_missing_outputs_with_empty_values() {
        let store = Arc::new(super::super::storage::MemoryStore::new());
        let config = Config::default();
        let gateway = Arc::new(super::super::llm::LlmGateway::new(
            Arc::new(NoopClient),
            config.llm.clone(),
        ));
        let content = Arc::new(ContentGenerator::new(gateway, 8));
        let runner = WorkflowRunner::new(store, content, config);

        let state = RunState::new("run-1", "https://example.com/repo.git");
        let results = runner.finalize(&state);

        assert_eq!(results.status, RunStatus::Completed);
        assert!(results.artifacts.architecture_md.is_empty());
        assert!(results.components.is_empty());
        assert_eq!(results.file_count, 0);
        assert_eq!(results.token_budget.gen_calls, 1);
    }

    struct NoopClient;

    #[async_trait::async_trait]
    impl super::super::llm::ModelClient for NoopClient {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
        ) -> std::result::Result<String, super::super::llm::ModelCallError> {
            Err(super::super::llm::ModelCallError::Quota)
        }
    }
}
