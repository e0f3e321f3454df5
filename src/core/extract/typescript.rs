use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use tracing::debug;
use tree_sitter::{Node, Parser};

use super::super::scanner::{FileRecord, Language};
use super::{Edge, ExtractorTag};
use crate::error::{CartographError, Result};

const EXTENSION_CANDIDATES: [&str; 4] = ["ts", "tsx", "js", "jsx"];

/// The slice of `tsconfig.json` that matters for import resolution.
#[derive(Debug, Default, Clone)]
pub struct TsConfig {
    base_url: String,
    /// Alias pattern -> replacement list, in declaration order
    paths: Vec<(String, Vec<String>)>,
}

impl TsConfig {
    /// Load from `<repo_root>/tsconfig.json`; a missing or unparseable file
    /// yields an empty configuration.
    pub fn load(repo_root: &Path) -> Self {
        let Ok(text) = std::fs::read_to_string(repo_root.join("tsconfig.json")) else {
            return Self::default();
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
            debug!("tsconfig.json did not parse, ignoring path aliases");
            return Self::default();
        };

        let options = &value["compilerOptions"];
        let base_url = options["baseUrl"].as_str().unwrap_or("").to_string();
        let mut paths = Vec::new();
        if let Some(map) = options["paths"].as_object() {
            for (pattern, replacements) in map {
                let repls: Vec<String> = match replacements {
                    serde_json::Value::Array(items) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    serde_json::Value::String(s) => vec![s.clone()],
                    _ => Vec::new(),
                };
                if !repls.is_empty() {
                    paths.push((pattern.clone(), repls));
                }
            }
        }
        Self { base_url, paths }
    }
}

/// JS/TS import extraction: a tree-sitter primary with grammar selection per
/// extension and a line-oriented regex fallback for files the parser
/// rejects.
pub struct ScriptExtractor {
    parser: Parser,
    fallback_patterns: Vec<Regex>,
}

impl ScriptExtractor {
    pub fn new() -> Result<Self> {
        let patterns = [
            r#"import\s+.*?\s+from\s+['"]([^'"]+)['"]"#,
            r#"import\s+['"]([^'"]+)['"]"#,
            r#"export\s+.*?\s+from\s+['"]([^'"]+)['"]"#,
            r#"require\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
            r#"import\s*\(\s*['"]([^'"]+)['"]\s*\)"#,
        ]
        .iter()
        .map(|p| Regex::new(p).map_err(|e| CartographError::Parser(e.to_string())))
        .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            parser: Parser::new(),
            fallback_patterns: patterns,
        })
    }

    /// Extract edges for every JS/TS file in the record set.
    pub fn extract(&mut self, repo_root: &Path, files: &[FileRecord]) -> Vec<Edge> {
        let tsconfig = TsConfig::load(repo_root);
        let file_set: HashSet<&str> = files.iter().map(|f| f.path.as_str()).collect();

        let mut edges = Vec::new();
        for file in files {
            if !file.language.is_script() {
                continue;
            }
            let Ok(bytes) = std::fs::read(repo_root.join(&file.path)) else {
                continue;
            };
            let content = String::from_utf8_lossy(&bytes);

            let (specs, tag) = match self.primary_specs(&content, file.language) {
                Some(specs) => (specs, ExtractorTag::TsAst),
                None => {
                    debug!("tree-sitter failed for {}, using regex scan", file.path);
                    (self.fallback_specs(&content), ExtractorTag::TsRegex)
                }
            };

            for spec in specs {
                match resolve_import(&spec, &file.path, &tsconfig, &file_set) {
                    Some(dst) => edges.push(Edge::new(&file.path, &dst, true, tag)),
                    None => edges.push(Edge::new(&file.path, &spec, false, tag)),
                }
            }
        }
        edges
    }

    fn primary_specs(&mut self, content: &str, language: Language) -> Option<Vec<String>> {
        let grammar = match language {
            Language::Typescript => tree_sitter_typescript::language_typescript(),
            Language::Tsx => tree_sitter_typescript::language_tsx(),
            _ => tree_sitter_javascript::language(),
        };
        self.parser.set_language(&grammar).ok()?;
        let tree = self.parser.parse(content, None)?;

        let mut specs = Vec::new();
        collect_specs(tree.root_node(), content, &mut specs);
        Some(specs)
    }

    fn fallback_specs(&self, content: &str) -> Vec<String> {
        let mut specs = Vec::new();
        for pattern in &self.fallback_patterns {
            for capture in pattern.captures_iter(content) {
                specs.push(capture[1].to_string());
            }
        }
        specs
    }
}

/// Collect import specifiers: static imports, `export ... from`, and string
/// arguments to `require(...)` and dynamic `import(...)`.
fn collect_specs(node: Node, source: &str, specs: &mut Vec<String>) {
    match node.kind() {
        "import_statement" | "export_statement" => {
            if let Some(source_node) = node.child_by_field_name("source") {
                if let Some(spec) = string_value(source_node, source) {
                    specs.push(spec);
                }
            }
        }
        "call_expression" => {
            let is_import_call = node
                .child_by_field_name("function")
                .map(|f| f.kind() == "import" || node_text(f, source) == "require")
                .unwrap_or(false);
            if is_import_call {
                if let Some(args) = node.child_by_field_name("arguments") {
                    let mut cursor = args.walk();
                    let found = args.children(&mut cursor).find(|c| c.kind() == "string");
                    if let Some(arg) = found {
                        if let Some(spec) = string_value(arg, source) {
                            specs.push(spec);
                        }
                    }
                }
            }
        }
        _ => {}
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        collect_specs(child, source, specs);
    }
}

fn string_value(node: Node, source: &str) -> Option<String> {
    let text = node_text(node, source);
    if text.len() >= 2 && (text.starts_with('"') || text.starts_with('\'')) {
        Some(text[1..text.len() - 1].to_string())
    } else {
        None
    }
}

fn node_text(node: Node, source: &str) -> String {
    source[node.byte_range()].to_string()
}

/// Resolve a specifier to a repo-relative file when it is internal.
///
/// Relative specifiers normalize against the importing file; bare specifiers
/// are checked against tsconfig path aliases (exact, then single-`*`
/// wildcards); anything else is external.
fn resolve_import(
    spec: &str,
    src: &str,
    tsconfig: &TsConfig,
    file_set: &HashSet<&str>,
) -> Option<String> {
    if spec.starts_with('.') {
        let dir = src.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        let joined = if dir.is_empty() {
            spec.to_string()
        } else {
            format!("{dir}/{spec}")
        };
        return probe(&normalize(&joined)?, file_set);
    }
    if let Some(rooted) = spec.strip_prefix('/') {
        return probe(&normalize(rooted)?, file_set);
    }

    // Exact alias
    for (pattern, replacements) in &tsconfig.paths {
        if pattern == spec {
            for repl in replacements {
                let candidate = join_base(&tsconfig.base_url, repl);
                if let Some(hit) = probe(&normalize(&candidate)?, file_set) {
                    return Some(hit);
                }
            }
        }
    }

    // Wildcard alias, one star only
    for (pattern, replacements) in &tsconfig.paths {
        let Some((prefix, suffix)) = pattern.split_once('*') else {
            continue;
        };
        if spec.len() >= prefix.len() + suffix.len()
            && spec.starts_with(prefix)
            && spec.ends_with(suffix)
        {
            let mid = &spec[prefix.len()..spec.len() - suffix.len()];
            for repl in replacements {
                let candidate = join_base(&tsconfig.base_url, &repl.replacen('*', mid, 1));
                if let Some(hit) = probe(&normalize(&candidate)?, file_set) {
                    return Some(hit);
                }
            }
        }
    }

    None
}

fn join_base(base_url: &str, path: &str) -> String {
    let base = base_url.trim_matches('/');
    if base.is_empty() || base == "." {
        path.to_string()
    } else {
        format!("{base}/{path}")
    }
}

/// Collapse `.` and `..` segments; `None` when the path escapes the root.
fn normalize(path: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    Some(parts.join("/"))
}

/// Probe extension candidates in order: exact, `.ts`, `.tsx`, `.js`, `.jsx`,
/// then `index.*` in the same order.
fn probe(path: &str, file_set: &HashSet<&str>) -> Option<String> {
    if file_set.contains(path) {
        return Some(path.to_string());
    }
    for ext in EXTENSION_CANDIDATES {
        let candidate = format!("{path}.{ext}");
        if file_set.contains(candidate.as_str()) {
            return Some(candidate);
        }
    }
    for ext in EXTENSION_CANDIDATES {
        let candidate = format!("{path}/index.{ext}");
        if file_set.contains(candidate.as_str()) {
            return Some(candidate);
        }
    }
    None
}
