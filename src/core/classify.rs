use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::extract::Edge;

// Category token tables. Matching is a cascade of case-insensitive substring
// checks in this exact order; adding a token must never reorder categories.
const FRONTEND_TOKENS: [&str; 4] = ["react", "vue", "angular", "svelte"];
const WEB_FRAMEWORK_TOKENS: [&str; 5] = ["express", "fastapi", "flask", "django", "koa"];
const DATABASE_TOKENS: [&str; 5] = ["postgres", "mysql", "mongodb", "redis", "sqlite"];
const TESTING_TOKENS: [&str; 5] = ["jest", "pytest", "mocha", "chai", "cypress"];
const BUILD_TOOL_TOKENS: [&str; 5] = ["webpack", "vite", "rollup", "babel", "typescript"];
const UI_LIBRARY_TOKENS: [&str; 5] = ["tailwind", "bootstrap", "material", "antd", "chakra"];
const UTILITY_TOKENS: [&str; 5] = ["lodash", "axios", "moment", "uuid", "crypto"];

/// Classify an external package specifier into its category name.
pub fn categorize_external(package: &str) -> &'static str {
    let lower = package.to_lowercase();
    let contains_any = |tokens: &[&str]| tokens.iter().any(|t| lower.contains(t));

    if contains_any(&FRONTEND_TOKENS) {
        "Frontend Frameworks"
    } else if contains_any(&WEB_FRAMEWORK_TOKENS) {
        "Web Frameworks"
    } else if contains_any(&DATABASE_TOKENS) {
        "Databases"
    } else if contains_any(&TESTING_TOKENS) {
        "Testing"
    } else if contains_any(&BUILD_TOOL_TOKENS) {
        "Build Tools"
    } else if contains_any(&UI_LIBRARY_TOKENS) {
        "UI Libraries"
    } else if contains_any(&UTILITY_TOKENS) {
        "Utilities"
    } else if package.starts_with("@types/") {
        "Type Definitions"
    } else if package.starts_with('@') {
        "Scoped Packages"
    } else if package.split('.').count() > 2 {
        "Standard Library"
    } else {
        "External Libraries"
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencySummary {
    pub internal_count: usize,
    pub external_count: usize,
    pub categories: Vec<String>,
    pub total_files: usize,
}

/// Partition of the full edge set into internal relations and categorized
/// external package usage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyAnalysis {
    pub total_edges: usize,
    /// (source file, destination file) pairs
    pub internal_edges: Vec<(String, String)>,
    /// Category name -> (source file, package) pairs
    pub external_groups: BTreeMap<String, Vec<(String, String)>>,
    pub summary: DependencySummary,
}

impl DependencyAnalysis {
    /// The partition is total: every edge lands in `internal_edges` or in
    /// exactly one external category.
    pub fn build(edges: &[Edge], total_files: usize) -> Self {
        let mut internal_edges = Vec::new();
        let mut external_groups: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();

        for edge in edges {
            if edge.internal {
                internal_edges.push((edge.src.clone(), edge.dst.clone()));
            } else {
                external_groups
                    .entry(categorize_external(&edge.dst).to_string())
                    .or_default()
                    .push((edge.src.clone(), edge.dst.clone()));
            }
        }

        let external_count = external_groups.values().map(Vec::len).sum();
        let summary = DependencySummary {
            internal_count: internal_edges.len(),
            external_count,
            categories: external_groups.keys().cloned().collect(),
            total_files,
        };

        Self {
            total_edges: edges.len(),
            internal_edges,
            external_groups,
            summary,
        }
    }
}
