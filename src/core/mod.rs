//! The analysis engine: static prelude, LLM-backed generation, and the
//! staged workflow that ties them together.

mod classify;
mod content;
mod diagram;
mod extract;
mod fetcher;
mod graph;
mod llm;
mod mermaid;
mod scanner;
mod service;
mod state;
mod storage;
mod workflow;

pub use classify::{categorize_external, DependencyAnalysis, DependencySummary};
pub use content::{select_excerpts, ComponentApi, ComponentRecord, ContentGenerator, KeyFile};
pub use diagram::{DiagramLoop, DiagramOutcome, SeedCandidate};
pub use extract::{merge_edges, Edge, ExtractorTag, ImportExtractor};
pub use fetcher::{RepoFetcher, RepoWorkspace};
pub use graph::{CentralFile, DependencyGraph, GraphEdge, GraphNode};
pub use llm::{
    clean_markdown, extract_json_object, extract_mermaid, GeminiClient, LlmGateway,
    ModelCallError, ModelClient,
};
pub use mermaid::{
    folders_mermaid, modules_mermaid, repair, rule_based_diagram, safe_node_id, validate,
    DiagramMode, Finding, FindingKind, ValidationReport,
};
pub use scanner::{language_stats, loc_total, FileRecord, FileScanner, Language};
pub use service::{AnalysisService, StartOutcome};
pub use state::{
    AnalysisResults, Artifacts, ErrorLog, MetricsBundle, RepoInfo, RunRecord, RunState,
    RunStatus, TokenBudget,
};
pub use storage::{AnalysisStore, JsonStore, MemoryStore};
pub use workflow::{WorkflowRunner, EMPTY_REPO_NARRATIVE};
