//! Hybrid import extraction across Python and JS/TS sources.
//!
//! Every language capability runs a high-fidelity primary extractor and a
//! coarser fallback; their edge sets are merged by union. The primaries
//! occasionally fail on partial or malformed code, the fallbacks never see
//! project structure, so neither is sufficient alone.

mod python;
mod typescript;

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::scanner::FileRecord;
use crate::error::Result;

pub use python::PythonExtractor;
pub use typescript::ScriptExtractor;

/// Which parser produced an edge. Diagnostic only, never semantic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtractorTag {
    #[serde(rename = "py-pkg")]
    PyPackage,
    #[serde(rename = "py-ast")]
    PyAst,
    #[serde(rename = "ts-ast")]
    TsAst,
    #[serde(rename = "ts-regex")]
    TsRegex,
}

/// A single import relation.
///
/// When `internal` is true, `dst` is a repo-relative file path present in
/// the scanned file set; otherwise it is the raw import specifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub src: String,
    pub dst: String,
    pub internal: bool,
    pub via: ExtractorTag,
}

impl Edge {
    pub fn new(src: &str, dst: &str, internal: bool, via: ExtractorTag) -> Self {
        Self {
            src: src.to_string(),
            dst: dst.to_string(),
            internal,
            via,
        }
    }
}

/// Runs every extractor over the scanned files and merges the results.
pub struct ImportExtractor {
    python: PythonExtractor,
    script: ScriptExtractor,
}

impl ImportExtractor {
    pub fn new() -> Result<Self> {
        Ok(Self {
            python: PythonExtractor::new()?,
            script: ScriptExtractor::new()?,
        })
    }

    /// Produce the merged edge set for the file-record set.
    pub fn extract(&mut self, repo_root: &Path, files: &[FileRecord]) -> Result<Vec<Edge>> {
        let mut edges = Vec::new();

        edges.extend(self.python.package_edges(repo_root, files));
        edges.extend(self.python.fallback_edges(repo_root, files));
        edges.extend(self.script.extract(repo_root, files));

        let merged = merge_edges(edges);
        debug!(
            "Extracted {} edges ({} internal)",
            merged.len(),
            merged.iter().filter(|e| e.internal).count()
        );
        Ok(merged)
    }
}

/// Union with deduplication by `(src, dst)`.
///
/// When extractors disagree on internal-vs-external for the same pair,
/// internal wins: a resolved file path is strictly more informative than the
/// raw specifier. Self-imports are dropped outright.
pub fn merge_edges(edges: Vec<Edge>) -> Vec<Edge> {
    let mut by_pair: HashMap<(String, String), Edge> = HashMap::new();

    for edge in edges {
        if edge.internal && edge.src == edge.dst {
            continue;
        }
        let key = (edge.src.clone(), edge.dst.clone());
        match by_pair.get(&key) {
            Some(existing) if existing.internal || !edge.internal => {}
            _ => {
                by_pair.insert(key, edge);
            }
        }
    }

    let mut merged: Vec<Edge> = by_pair.into_values().collect();
    merged.sort_by(|a, b| (&a.src, &a.dst).cmp(&(&b.src, &b.dst)));
    merged
}
