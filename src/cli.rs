use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::core::{
    AnalysisService, AnalysisStore, DiagramMode, GeminiClient, JsonStore, ModelCallError,
    ModelClient,
};
use crate::error::CartographError;

#[derive(Parser)]
#[command(name = "cartograph")]
#[command(about = "Repository architecture analysis with AI-generated overviews and diagrams")]
#[command(version)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a repository and print the result summary
    Analyze {
        /// Repository URL to analyze
        repo_url: String,

        /// Re-analyze even when a completed run exists for this URL
        #[arg(long)]
        force_refresh: bool,

        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the status of a run
    Status {
        run_id: String,
    },

    /// Print the stored results of a completed run as JSON
    Result {
        run_id: String,
    },

    /// Generate one diagram mode from stored analysis data
    Diagram {
        run_id: String,

        /// overview | balanced | detailed
        mode: String,
    },

    /// Run the self-correction loop on a broken diagram
    Correct {
        run_id: String,

        /// overview | balanced | detailed
        mode: String,

        /// File containing the broken Mermaid code
        #[arg(short, long)]
        input: PathBuf,

        /// Error message reported by the downstream renderer
        #[arg(short, long)]
        message: String,
    },
}

impl Cli {
    pub async fn execute(self) -> Result<()> {
        let config = Config::load_or_default(self.config.as_deref())?;
        let store: Arc<dyn AnalysisStore> =
            Arc::new(JsonStore::open(&config.workspace.work_dir.join("store"))?);

        // Read-only commands work without a configured model provider.
        let needs_llm = matches!(
            self.command,
            Commands::Analyze { .. } | Commands::Diagram { .. } | Commands::Correct { .. }
        );
        let client: Arc<dyn ModelClient> = if needs_llm {
            Arc::new(GeminiClient::new(&config.llm)?)
        } else {
            Arc::new(OfflineClient)
        };
        let service = AnalysisService::new(config, store, client);

        match self.command {
            Commands::Analyze {
                repo_url,
                force_refresh,
                json,
            } => {
                let (outcome, results) =
                    service.run_to_completion(&repo_url, force_refresh).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&results)?);
                } else {
                    print_summary(&outcome.run_id, outcome.cached, &results);
                }
                Ok(())
            }
            Commands::Status { run_id } => {
                let record = service.status(&run_id).await?;
                println!("run:      {}", record.run_id);
                println!("url:      {}", record.repo_url);
                println!("status:   {}", record.status);
                println!("progress: {}", record.progress);
                if let Some(message) = &record.message {
                    println!("message:  {message}");
                }
                Ok(())
            }
            Commands::Result { run_id } => {
                let results = service.result(&run_id).await?;
                println!("{}", serde_json::to_string_pretty(&results)?);
                Ok(())
            }
            Commands::Diagram { run_id, mode } => {
                let mode = parse_mode(&mode)?;
                let diagram = service.generate_diagram(&run_id, mode).await?;
                println!("{diagram}");
                Ok(())
            }
            Commands::Correct {
                run_id,
                mode,
                input,
                message,
            } => {
                let mode = parse_mode(&mode)?;
                let broken = std::fs::read_to_string(&input)?;
                let corrected = service
                    .correct_diagram(&run_id, mode, &broken, &message)
                    .await?;
                println!("{corrected}");
                Ok(())
            }
        }
    }
}

fn parse_mode(raw: &str) -> Result<DiagramMode> {
    DiagramMode::parse(raw).ok_or_else(|| {
        CartographError::Config(format!(
            "invalid diagram mode '{raw}' (expected overview, balanced, or detailed)"
        ))
        .into()
    })
}

fn print_summary(run_id: &str, cached: bool, results: &crate::core::AnalysisResults) {
    println!(
        "Analysis {} ({})",
        run_id,
        if cached { "cached" } else { "fresh" }
    );
    println!("  repo:       {} @ {}", results.repo.url, results.repo.commit_sha);
    println!(
        "  files:      {} ({} lines)",
        results.file_count, results.loc_total
    );
    let stats = results
        .language_stats
        .iter()
        .map(|(lang, pct)| format!("{lang} {pct}%"))
        .collect::<Vec<_>>()
        .join(", ");
    println!("  languages:  {stats}");
    println!(
        "  graph:      {} nodes, {} edges",
        results.metrics.graph.nodes.len(),
        results.metrics.graph.edges.len()
    );
    println!("  components: {}", results.components.len());
    for (name, present) in [
        ("architecture_md", !results.artifacts.architecture_md.is_empty()),
        ("overview diagram", !results.artifacts.mermaid_modules_simple.is_empty()),
        ("balanced diagram", !results.artifacts.mermaid_modules_balanced.is_empty()),
        ("detailed diagram", !results.artifacts.mermaid_modules_detailed.is_empty()),
        ("folder diagram", !results.artifacts.mermaid_folders.is_empty()),
    ] {
        println!("  {name}: {}", if present { "ok" } else { "missing" });
    }
    if !results.warnings.is_empty() {
        println!("  warnings:");
        for warning in &results.warnings {
            println!("    - {warning}");
        }
    }
}

/// Stand-in client for commands that never call the model.
struct OfflineClient;

#[async_trait]
impl ModelClient for OfflineClient {
    async fn generate(
        &self,
        _model: &str,
        _prompt: &str,
    ) -> std::result::Result<String, ModelCallError> {
        Err(ModelCallError::Fatal(
            "no model provider configured (set GEMINI_API_KEY)".to_string(),
        ))
    }
}
