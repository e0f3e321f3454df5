use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::extract::{Edge, ExtractorTag};
use super::scanner::{FileRecord, Language};

const TOP_FILES_RANKING: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub language: Language,
    pub loc: usize,
    pub fan_in: usize,
    pub fan_out: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub source: String,
    pub target: String,
    pub via: ExtractorTag,
}

/// The directed file-level dependency graph with per-node metrics.
///
/// Nodes are the internal files; only internal edges participate. The whole
/// structure serializes into the persisted artifact.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
    pub fan_in: BTreeMap<String, usize>,
    pub fan_out: BTreeMap<String, usize>,
    pub degree_centrality: BTreeMap<String, f64>,
    /// Top-100 files by fan-in + fan-out, ties broken by path
    pub top_files: Vec<String>,
}

/// A ranked entry in the central-files summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CentralFile {
    pub path: String,
    pub fan_in: usize,
    pub fan_out: usize,
    pub degree_centrality: f64,
    pub total_degree: usize,
}

impl DependencyGraph {
    /// Build the graph from the scanned files and the merged edge set.
    ///
    /// Adjacency is held as two parallel neighbor-set maps; centrality is
    /// (fan_in + fan_out) / max(1, |V| - 1).
    pub fn build(files: &[FileRecord], edges: &[Edge]) -> Self {
        let internal_files: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();

        let mut forward: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        let mut reverse: HashMap<&str, BTreeSet<&str>> = HashMap::new();
        let mut graph_edges = Vec::new();

        for edge in edges {
            if !edge.internal
                || edge.src == edge.dst
                || !internal_files.contains(edge.src.as_str())
                || !internal_files.contains(edge.dst.as_str())
            {
                continue;
            }
            forward.entry(&edge.src).or_default().insert(&edge.dst);
            reverse.entry(&edge.dst).or_default().insert(&edge.src);
            graph_edges.push(GraphEdge {
                source: edge.src.clone(),
                target: edge.dst.clone(),
                via: edge.via,
            });
        }

        let denominator = files.len().saturating_sub(1).max(1) as f64;
        let mut fan_in = BTreeMap::new();
        let mut fan_out = BTreeMap::new();
        let mut degree_centrality = BTreeMap::new();
        let mut nodes = Vec::with_capacity(files.len());

        for file in files {
            let fi = reverse.get(file.path.as_str()).map_or(0, BTreeSet::len);
            let fo = forward.get(file.path.as_str()).map_or(0, BTreeSet::len);
            fan_in.insert(file.path.clone(), fi);
            fan_out.insert(file.path.clone(), fo);
            degree_centrality.insert(file.path.clone(), (fi + fo) as f64 / denominator);
            nodes.push(GraphNode {
                id: file.path.clone(),
                language: file.language,
                loc: file.loc,
                fan_in: fi,
                fan_out: fo,
            });
        }

        let mut ranked: Vec<&GraphNode> = nodes.iter().collect();
        ranked.sort_by(|a, b| {
            let degree_a = a.fan_in + a.fan_out;
            let degree_b = b.fan_in + b.fan_out;
            degree_b.cmp(&degree_a).then_with(|| a.id.cmp(&b.id))
        });
        let top_files = ranked
            .into_iter()
            .take(TOP_FILES_RANKING)
            .map(|n| n.id.clone())
            .collect();

        Self {
            nodes,
            edges: graph_edges,
            fan_in,
            fan_out,
            degree_centrality,
            top_files,
        }
    }

    /// Central-files summary for the persisted artifact.
    pub fn central_files(&self, limit: usize) -> Vec<CentralFile> {
        self.top_files
            .iter()
            .take(limit)
            .map(|path| {
                let fi = self.fan_in.get(path).copied().unwrap_or(0);
                let fo = self.fan_out.get(path).copied().unwrap_or(0);
                CentralFile {
                    path: path.clone(),
                    fan_in: fi,
                    fan_out: fo,
                    degree_centrality: (self.degree_centrality.get(path).copied().unwrap_or(0.0)
                        * 10_000.0)
                        .round()
                        / 10_000.0,
                    total_degree: fi + fo,
                }
            })
            .collect()
    }
}
