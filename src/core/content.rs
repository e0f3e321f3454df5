use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::classify::DependencyAnalysis;
use super::graph::DependencyGraph;
use super::llm::{prompts, LlmGateway};
use super::mermaid::DiagramMode;
use super::scanner::FileRecord;
use crate::error::{CartographError, Result};

/// Total character budget for the excerpts attached to a narrative prompt.
const EXCERPT_CHAR_BUDGET: usize = 14_000;
const NARRATIVE_TOP_FILES: usize = 30;
const NARRATIVE_EXCERPTS: usize = 12;
const INTERNAL_DEPS_IN_PROMPT: usize = 30;
const SAMPLE_DEPS_PER_CATEGORY: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyFile {
    pub path: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentApi {
    pub name: String,
    #[serde(default)]
    pub file: String,
}

/// One architectural component as the model describes it. Persisted as
/// opaque structured data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentRecord {
    pub name: String,
    #[serde(default)]
    pub purpose: String,
    #[serde(default)]
    pub key_files: Vec<KeyFile>,
    #[serde(default)]
    pub apis: Vec<ComponentApi>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub tests: Vec<String>,
}

/// Assembles prompts for the narrative, component, and diagram tasks and
/// parses the responses.
pub struct ContentGenerator {
    gateway: Arc<LlmGateway>,
    component_count: usize,
}

impl ContentGenerator {
    pub fn new(gateway: Arc<LlmGateway>, component_count: usize) -> Self {
        Self {
            gateway,
            component_count,
        }
    }

    pub fn gateway(&self) -> &LlmGateway {
        &self.gateway
    }

    /// Markdown architecture overview from language stats, the top file
    /// list, and excerpts of the most central files.
    pub async fn generate_narrative(
        &self,
        language_stats: &BTreeMap<String, f64>,
        top_files: &[String],
        excerpts: &[(String, String)],
    ) -> Result<String> {
        let stats_line = language_stats
            .iter()
            .map(|(lang, pct)| format!("{lang}: {pct}%"))
            .collect::<Vec<_>>()
            .join(", ");
        let top_lines = top_files
            .iter()
            .take(NARRATIVE_TOP_FILES)
            .map(|p| format!("- {p}"))
            .collect::<Vec<_>>()
            .join("\n");
        let excerpt_block = excerpts
            .iter()
            .take(NARRATIVE_EXCERPTS)
            .map(|(path, text)| format!("<file name=\"{path}\">\n{text}\n</file>"))
            .collect::<Vec<_>>()
            .join("\n\n");

        let user = format!(
            "Repo language stats: {stats_line}\n\nTop files (by centrality):\n{top_lines}\n\n\
             For each listed file, you may see a short excerpt below delimited by <file> tags.\n\
             {}\n\n{excerpt_block}",
            prompts::OVERVIEW_INSTRUCTIONS
        );

        self.gateway
            .generate_markdown(prompts::OVERVIEW_SYSTEM, &user)
            .await
    }

    /// Extract component records for the top files, one structured request
    /// per file group.
    ///
    /// Quota exhaustion propagates so the caller can degrade the stage; any
    /// other per-group failure yields a rule-based placeholder record.
    pub async fn extract_components(
        &self,
        top_files: &[String],
        excerpts: &[(String, String)],
    ) -> Result<Vec<ComponentRecord>> {
        let groups = group_files_by_component(top_files, self.component_count);
        let excerpt_lookup: BTreeMap<&str, &str> = excerpts
            .iter()
            .map(|(p, t)| (p.as_str(), t.as_str()))
            .collect();

        let mut components = Vec::new();
        for (group_name, files) in groups {
            let group_excerpts: Vec<(&String, &&str)> = files
                .iter()
                .filter_map(|f| excerpt_lookup.get(f.as_str()).map(|t| (f, t)))
                .collect();
            if group_excerpts.is_empty() {
                continue;
            }

            let files_block = files
                .iter()
                .map(|f| format!("- {f}"))
                .collect::<Vec<_>>()
                .join("\n");
            let excerpts_block = group_excerpts
                .iter()
                .map(|(path, text)| {
                    let short: String = text.chars().take(800).collect();
                    format!("<file name=\"{path}\">\n{short}\n</file>")
                })
                .collect::<Vec<_>>()
                .join("\n\n");
            let user = format!(
                "Analyze these files to identify ONE architectural component:\n\n\
                 Files: {files_block}\n\nCode excerpts:\n{excerpts_block}\n\n{}",
                prompts::COMPONENT_SHAPE
            );

            match self
                .gateway
                .generate_structured::<ComponentRecord>(prompts::COMPONENT_SYSTEM, &user)
                .await
            {
                Ok(component) => components.push(component),
                Err(err @ CartographError::QuotaExhausted { .. }) => return Err(err),
                Err(e) => {
                    warn!("Component extraction failed for {group_name}: {e}");
                    components.push(placeholder_component(&group_name, &files));
                }
            }
        }

        Ok(components)
    }

    /// One Mermaid flowchart for the given mode.
    pub async fn generate_diagram(
        &self,
        analysis: &DependencyAnalysis,
        graph: &DependencyGraph,
        narrative: &str,
        folder_diagram: &str,
        mode: DiagramMode,
    ) -> Result<String> {
        let component_map = extract_markdown_section(narrative, "Component Map");
        let data_flow = extract_markdown_section(narrative, "Data Flow");

        let internal_deps = analysis
            .internal_edges
            .iter()
            .take(INTERNAL_DEPS_IN_PROMPT)
            .map(|(src, dst)| format!("{src} -> {dst}"))
            .collect::<Vec<_>>()
            .join("\n");
        let external_deps = analysis
            .external_groups
            .iter()
            .map(|(category, deps)| {
                let samples = deps
                    .iter()
                    .take(SAMPLE_DEPS_PER_CATEGORY)
                    .map(|(_, pkg)| pkg.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{category} ({}): {samples}", deps.len())
            })
            .collect::<Vec<_>>()
            .join("\n");
        let top_files = graph
            .top_files
            .iter()
            .take(15)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");

        let user = format!(
            "Use this repo context:\n\
             PROJECT STRUCTURE (as Mermaid code block for parsing only):\n```mermaid\n{folder_diagram}\n```\n\n\
             COMPONENT MAP:\n{}\n\n\
             DATA FLOW NOTES:\n{}\n\n\
             INTERNAL DEPENDENCIES:\n{}\n\n\
             EXTERNAL DEPENDENCIES:\n{}\n\n\
             PROJECT STATS:\n- Total Files: {}\n- Top Files: {top_files}\n- Internal/External: {}/{}\n\n\
             Now generate the diagram for the selected MODE using the MODE POLICY below.\n{}",
            fallback(&component_map, "No component map available"),
            fallback(&data_flow, "No data flow information available"),
            fallback(&internal_deps, "No internal dependencies found"),
            fallback(&external_deps, "No external dependencies found"),
            analysis.summary.total_files,
            analysis.summary.internal_count,
            analysis.summary.external_count,
            prompts::mode_policy(mode)
        );

        self.gateway
            .generate_mermaid(prompts::MERMAID_COMMON_SYSTEM, &user)
            .await
    }

    /// Ask the model to repair a broken diagram, given the remaining
    /// validator findings.
    pub async fn repair_diagram(
        &self,
        broken_diagram: &str,
        validation_errors: &[String],
    ) -> Result<String> {
        let error_block = validation_errors
            .iter()
            .map(|e| format!("- {e}"))
            .collect::<Vec<_>>()
            .join("\n");
        let user = format!(
            "BROKEN DIAGRAM:\n```\n{broken_diagram}\n```\n\n\
             ERROR MESSAGES:\n{error_block}\n\n\
             INSTRUCTIONS:\n\
             1. Read the error messages carefully\n\
             2. Find the problematic lines\n\
             3. Apply the MINIMAL fix needed\n\
             4. Keep everything else EXACTLY the same\n\
             5. Return ONLY the corrected diagram code\n\n\
             CORRECTED DIAGRAM:"
        );

        self.gateway
            .generate_mermaid(prompts::MERMAID_CORRECTION_SYSTEM, &user)
            .await
    }
}

/// Excerpts for the narrative prompt, chosen to maximize directory
/// diversity among the top files and bounded by a total character budget.
pub fn select_excerpts(
    files: &[FileRecord],
    top_files: &[String],
    max_count: usize,
) -> Vec<(String, String)> {
    let lookup: BTreeMap<&str, &FileRecord> =
        files.iter().map(|f| (f.path.as_str(), f)).collect();

    // Bucket the ranked files by top-level directory, preserving rank order
    // inside each bucket.
    let mut buckets: BTreeMap<String, Vec<&FileRecord>> = BTreeMap::new();
    let mut bucket_order = Vec::new();
    for path in top_files {
        let Some(record) = lookup.get(path.as_str()) else {
            continue;
        };
        let bucket = path.split('/').next().unwrap_or("").to_string();
        if !buckets.contains_key(&bucket) {
            bucket_order.push(bucket.clone());
        }
        buckets.entry(bucket).or_default().push(record);
    }

    let mut selected = Vec::new();
    let mut remaining_budget = EXCERPT_CHAR_BUDGET;
    let mut round = 0;
    loop {
        let mut picked_any = false;
        for bucket in &bucket_order {
            if selected.len() >= max_count || remaining_budget == 0 {
                return selected;
            }
            let Some(record) = buckets.get(bucket).and_then(|b| b.get(round)) else {
                continue;
            };
            let excerpt: String = record
                .excerpt
                .chars()
                .take(remaining_budget.min(record.excerpt.chars().count()))
                .collect();
            remaining_budget = remaining_budget.saturating_sub(excerpt.chars().count());
            selected.push((record.path.clone(), excerpt));
            picked_any = true;
        }
        if !picked_any {
            return selected;
        }
        round += 1;
    }
}

/// Group files into candidate components by their leading path segment.
fn group_files_by_component(files: &[String], limit: usize) -> Vec<(String, Vec<String>)> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for path in files {
        let parts: Vec<&str> = path.split('/').collect();
        let raw: &str = if parts.len() <= 1 {
            "Core"
        } else if matches!(parts[0], "src" | "lib" | "app") {
            parts[1]
        } else {
            parts[0]
        };
        let name = title_case(raw);
        groups.entry(name).or_default().push(path.clone());
    }

    let mut ordered: Vec<(String, Vec<String>)> = groups.into_iter().collect();
    ordered.sort_by(|a, b| b.1.len().cmp(&a.1.len()).then_with(|| a.0.cmp(&b.0)));
    ordered.truncate(limit);
    ordered
}

fn title_case(raw: &str) -> String {
    raw.replace(['_', '-'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn placeholder_component(group_name: &str, files: &[String]) -> ComponentRecord {
    ComponentRecord {
        name: group_name.to_string(),
        purpose: format!("Component containing {} key files", files.len()),
        key_files: files
            .iter()
            .take(3)
            .map(|f| KeyFile {
                path: f.clone(),
                reason: "Core file".to_string(),
            })
            .collect(),
        risks: vec!["Analysis incomplete due to processing error".to_string()],
        ..ComponentRecord::default()
    }
}

/// Pull one `## Section` body out of the narrative markdown.
fn extract_markdown_section(markdown: &str, section: &str) -> String {
    let mut collected = Vec::new();
    let mut inside = false;
    for line in markdown.lines() {
        let trimmed = line.trim();
        if let Some(heading) = trimmed.strip_prefix("##").map(str::trim) {
            if inside {
                break;
            }
            inside = heading.eq_ignore_ascii_case(section);
            continue;
        }
        if inside {
            collected.push(line);
        }
    }
    collected.join("\n").trim().to_string()
}

fn fallback<'a>(value: &'a str, default: &'a str) -> &'a str {
    if value.is_empty() {
        default
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::scanner::Language;

    fn record(path: &str, excerpt: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            language: Language::Python,
            loc: 1,
            excerpt: excerpt.to_string(),
        }
    }

    #[test]
    fn excerpt_selection_round_robins_across_directories() {
        let files = vec![
            record("api/a.py", "a"),
            record("api/b.py", "b"),
            record("web/c.py", "c"),
        ];
        let top: Vec<String> = vec!["api/a.py", "api/b.py", "web/c.py"]
            .into_iter()
            .map(String::from)
            .collect();

        let selected = select_excerpts(&files, &top, 2);
        let paths: Vec<&str> = selected.iter().map(|(p, _)| p.as_str()).collect();
        // One from each directory before a second from `api`.
        assert_eq!(paths, vec!["api/a.py", "web/c.py"]);
    }

    #[test]
    fn grouping_prefers_second_segment_under_src() {
        let files: Vec<String> = vec!["src/auth/login.ts", "src/auth/token.ts", "cli.ts"]
            .into_iter()
            .map(String::from)
            .collect();
        let groups = group_files_by_component(&files, 8);

        assert_eq!(groups[0].0, "Auth");
        assert_eq!(groups[0].1.len(), 2);
        assert!(groups.iter().any(|(name, _)| name == "Core"));
    }

    #[test]
    fn grouping_respects_component_limit() {
        let files: Vec<String> = (0..20).map(|i| format!("mod{i}/file.py")).collect();
        let groups = group_files_by_component(&files, 8);
        assert_eq!(groups.len(), 8);
    }

    #[test]
    fn markdown_section_extraction_stops_at_next_heading() {
        let markdown = "# Doc\n## Component Map\nalpha\nbeta\n## Data Flow\ngamma\n";
        assert_eq!(
            extract_markdown_section(markdown, "Component Map"),
            "alpha\nbeta"
        );
        assert_eq!(extract_markdown_section(markdown, "Data Flow"), "gamma");
        assert_eq!(extract_markdown_section(markdown, "Risks"), "");
    }
}
