use std::collections::{BTreeMap, BTreeSet};

use super::super::classify::DependencyAnalysis;
use super::super::graph::GraphEdge;
use super::{safe_node_id, DiagramMode};

/// Deterministic file-level module diagram from the internal edge set.
///
/// This is the backward-compatible `mermaid_modules` artifact: no grouping
/// intelligence, just every connected file with its dependencies.
pub fn modules_mermaid(edges: &[GraphEdge]) -> String {
    let mut nodes: BTreeSet<&str> = BTreeSet::new();
    let mut pairs: BTreeSet<(&str, &str)> = BTreeSet::new();
    for edge in edges {
        nodes.insert(&edge.source);
        nodes.insert(&edge.target);
        pairs.insert((&edge.source, &edge.target));
    }

    let mut lines = vec!["flowchart LR".to_string()];
    for node in &nodes {
        let label = node.rsplit_once('/').map(|(_, f)| f).unwrap_or(node);
        lines.push(format!("    {}[\"{}\"]", safe_node_id(node), label));
    }
    for (src, dst) in &pairs {
        lines.push(format!("    {} --> {}", safe_node_id(src), safe_node_id(dst)));
    }
    lines.join("\n") + "\n"
}

/// Deterministic mode-shaped diagram used when LLM generation is
/// unavailable. Coarser than the generated ones but always valid.
pub fn rule_based_diagram(analysis: &DependencyAnalysis, mode: DiagramMode) -> String {
    match mode {
        DiagramMode::Overview => overview_diagram(analysis),
        DiagramMode::Balanced => grouped_diagram(analysis, false),
        DiagramMode::Detailed => grouped_diagram(analysis, true),
    }
}

fn overview_diagram(analysis: &DependencyAnalysis) -> String {
    let mut lines = vec!["flowchart LR".to_string()];
    let internal = analysis.summary.internal_count;
    if internal > 0 || !analysis.external_groups.is_empty() {
        lines.push(format!(
            "    ProjectModules[\"Project Modules ({internal})\"]"
        ));
    }
    for (category, deps) in &analysis.external_groups {
        let id = safe_node_id(category);
        lines.push(format!("    {id}[\"{category} ({})\"]", deps.len()));
        lines.push(format!("    ProjectModules --> {id}"));
    }
    lines.join("\n") + "\n"
}

fn grouped_diagram(analysis: &DependencyAnalysis, detailed: bool) -> String {
    let mut lines = vec!["flowchart LR".to_string()];

    if detailed {
        let mut nodes: BTreeSet<&str> = BTreeSet::new();
        for (src, dst) in &analysis.internal_edges {
            nodes.insert(src);
            nodes.insert(dst);
        }
        for node in &nodes {
            let label = node.rsplit_once('/').map(|(_, f)| f).unwrap_or(node);
            lines.push(format!("    {}[\"{}\"]", safe_node_id(node), label));
        }
        let mut seen = BTreeSet::new();
        for (src, dst) in &analysis.internal_edges {
            if seen.insert((src, dst)) {
                lines.push(format!(
                    "    {} --> {}",
                    safe_node_id(src),
                    safe_node_id(dst)
                ));
            }
        }
    } else {
        let mut group_sizes: BTreeMap<String, usize> = BTreeMap::new();
        let mut group_edges: BTreeSet<(String, String)> = BTreeSet::new();
        let mut members: BTreeSet<&str> = BTreeSet::new();
        for (src, dst) in &analysis.internal_edges {
            members.insert(src);
            members.insert(dst);
            let from = module_group(src);
            let to = module_group(dst);
            if from != to {
                group_edges.insert((from.clone(), to.clone()));
            }
        }
        for member in members {
            *group_sizes.entry(module_group(member)).or_default() += 1;
        }
        for (group, size) in &group_sizes {
            lines.push(format!("    {}[\"{group} ({size})\"]", safe_node_id(group)));
        }
        for (from, to) in &group_edges {
            lines.push(format!(
                "    {} --> {}",
                safe_node_id(from),
                safe_node_id(to)
            ));
        }
    }

    // External categories attach to whichever groups use them.
    let mut attach: BTreeSet<(String, String)> = BTreeSet::new();
    for (category, deps) in &analysis.external_groups {
        let id = safe_node_id(category);
        lines.push(format!("    {id}[\"{category} ({})\"]", deps.len()));
        for (src, _) in deps {
            let from = if detailed {
                safe_node_id(src)
            } else {
                safe_node_id(&module_group(src))
            };
            attach.insert((from, id.clone()));
        }
    }
    for (from, to) in &attach {
        lines.push(format!("    {from} --> {to}"));
    }

    lines.join("\n") + "\n"
}

/// Group a file under its top-level directory (or `Root`).
fn module_group(path: &str) -> String {
    match path.split_once('/') {
        Some((head, _)) => head.to_string(),
        None => "Root".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::extract::{Edge, ExtractorTag};
    use crate::core::mermaid::validate;

    fn analysis() -> DependencyAnalysis {
        let edges = vec![
            Edge::new("src/app.ts", "src/util.ts", true, ExtractorTag::TsAst),
            Edge::new("src/app.ts", "lib/db.ts", true, ExtractorTag::TsAst),
            Edge::new("src/app.ts", "react", false, ExtractorTag::TsAst),
        ];
        DependencyAnalysis::build(&edges, 3)
    }

    #[test]
    fn modules_diagram_lists_every_connected_file() {
        let edges = vec![GraphEdge {
            source: "src/app.ts".to_string(),
            target: "src/util.ts".to_string(),
            via: ExtractorTag::TsAst,
        }];
        let diagram = modules_mermaid(&edges);
        assert!(diagram.contains("src_app_ts[\"app.ts\"]"));
        assert!(diagram.contains("src_app_ts --> src_util_ts"));
        assert!(validate(&diagram, None).is_valid());
    }

    #[test]
    fn every_mode_produces_a_valid_diagram() {
        let analysis = analysis();
        for mode in DiagramMode::ALL {
            let diagram = rule_based_diagram(&analysis, mode);
            let report = validate(&diagram, Some(mode));
            assert!(report.is_valid(), "{mode}: {:?}", report.findings);
        }
    }

    #[test]
    fn balanced_mode_collapses_files_into_groups() {
        let diagram = rule_based_diagram(&analysis(), DiagramMode::Balanced);
        assert!(diagram.contains("src[\"src (2)\"]"));
        assert!(diagram.contains("lib[\"lib (1)\"]"));
        assert!(!diagram.contains("app.ts"));
    }

    #[test]
    fn empty_analysis_yields_header_only_overview() {
        let empty = DependencyAnalysis::default();
        let diagram = rule_based_diagram(&empty, DiagramMode::Overview);
        assert_eq!(diagram, "flowchart LR\n");
    }
}
