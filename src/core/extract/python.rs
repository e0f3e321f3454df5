use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;
use tree_sitter::{Node, Parser};

use super::super::scanner::{FileRecord, Language};
use super::{Edge, ExtractorTag};
use crate::error::{CartographError, Result};

/// One parsed `import` or `from ... import` construct.
#[derive(Debug)]
struct PyImport {
    /// Relative-import level: number of leading dots
    level: usize,
    /// Dotted module path, possibly empty for `from . import x`
    module: String,
    /// Imported names for `from` imports; empty for plain imports
    names: Vec<String>,
}

/// Python import extraction.
///
/// The primary pass is package-aware: it detects packages under the repo
/// root, indexes every module they contain, and resolves imports through
/// that index. The fallback pass parses each file in isolation and resolves
/// by probing candidate paths, which also covers loose scripts outside any
/// package.
pub struct PythonExtractor {
    parser: Parser,
}

impl PythonExtractor {
    pub fn new() -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::language())
            .map_err(|e| CartographError::Parser(format!("Failed to set Python language: {e}")))?;
        Ok(Self { parser })
    }

    /// Package-aware primary pass.
    pub fn package_edges(&mut self, repo_root: &Path, files: &[FileRecord]) -> Vec<Edge> {
        let index = module_index(files);
        if index.is_empty() {
            return Vec::new();
        }

        let mut edges = Vec::new();
        for file in files {
            if file.language != Language::Python {
                continue;
            }
            // Only files the index knows belong to a package.
            if !index.contains_key(&module_name(&file.path)) {
                continue;
            }
            let Some(content) = read_source(repo_root, &file.path) else {
                continue;
            };
            let Some(imports) = self.parse_imports(&content) else {
                debug!("Primary python parse failed for {}", file.path);
                continue;
            };
            for imp in imports {
                self.resolve_with_index(&file.path, &imp, &index, &mut edges);
            }
        }
        edges
    }

    /// Per-file fallback pass over every Python file.
    pub fn fallback_edges(&mut self, repo_root: &Path, files: &[FileRecord]) -> Vec<Edge> {
        let paths: BTreeMap<&str, ()> = files.iter().map(|f| (f.path.as_str(), ())).collect();

        let mut edges = Vec::new();
        for file in files {
            if file.language != Language::Python {
                continue;
            }
            let Some(content) = read_source(repo_root, &file.path) else {
                continue;
            };
            let Some(imports) = self.parse_imports(&content) else {
                debug!("Fallback python parse failed for {}", file.path);
                continue;
            };
            for imp in imports {
                self.resolve_by_probing(&file.path, &imp, &paths, &mut edges);
            }
        }
        edges
    }

    fn resolve_with_index(
        &self,
        src: &str,
        imp: &PyImport,
        index: &BTreeMap<String, String>,
        edges: &mut Vec<Edge>,
    ) {
        let Some(base) = absolute_module(src, imp) else {
            return;
        };

        if imp.names.is_empty() {
            // `import a.b` binds module a.b itself.
            if let Some(dst) = index.get(&base) {
                edges.push(Edge::new(src, dst, true, ExtractorTag::PyPackage));
            } else if imp.level == 0 {
                edges.push(Edge::new(src, &base, false, ExtractorTag::PyPackage));
            }
            return;
        }

        for name in &imp.names {
            let qualified = if base.is_empty() {
                name.clone()
            } else {
                format!("{base}.{name}")
            };
            // A from-import may bind a submodule or an attribute of the
            // module; prefer the submodule when it exists.
            if let Some(dst) = index.get(&qualified) {
                edges.push(Edge::new(src, dst, true, ExtractorTag::PyPackage));
            } else if let Some(dst) = index.get(&base) {
                edges.push(Edge::new(src, dst, true, ExtractorTag::PyPackage));
            } else if imp.level == 0 && !base.is_empty() {
                edges.push(Edge::new(src, &base, false, ExtractorTag::PyPackage));
            }
        }
    }

    fn resolve_by_probing(
        &self,
        src: &str,
        imp: &PyImport,
        paths: &BTreeMap<&str, ()>,
        edges: &mut Vec<Edge>,
    ) {
        let Some(base) = absolute_module(src, imp) else {
            return;
        };

        if imp.names.is_empty() {
            if let Some(dst) = probe_module(&base, paths) {
                edges.push(Edge::new(src, &dst, true, ExtractorTag::PyAst));
            } else if imp.level == 0 {
                edges.push(Edge::new(src, &base, false, ExtractorTag::PyAst));
            }
            return;
        }

        for name in &imp.names {
            let qualified = if base.is_empty() {
                name.clone()
            } else {
                format!("{base}.{name}")
            };
            if let Some(dst) = probe_module(&qualified, paths) {
                edges.push(Edge::new(src, &dst, true, ExtractorTag::PyAst));
            } else if let Some(dst) = probe_module(&base, paths) {
                edges.push(Edge::new(src, &dst, true, ExtractorTag::PyAst));
            } else if imp.level == 0 && !base.is_empty() {
                edges.push(Edge::new(src, &base, false, ExtractorTag::PyAst));
            }
        }
    }

    /// Parse a file's syntax tree and collect its import constructs.
    fn parse_imports(&mut self, content: &str) -> Option<Vec<PyImport>> {
        let tree = self.parser.parse(content, None)?;
        let mut imports = Vec::new();
        collect_imports(tree.root_node(), content, &mut imports);
        Some(imports)
    }
}

fn collect_imports(node: Node, source: &str, imports: &mut Vec<PyImport>) {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "import_statement" => {
                let mut names_cursor = child.walk();
                for name_node in child.children_by_field_name("name", &mut names_cursor) {
                    if let Some(module) = dotted_text(name_node, source) {
                        imports.push(PyImport {
                            level: 0,
                            module,
                            names: Vec::new(),
                        });
                    }
                }
            }
            "import_from_statement" => {
                let Some(module_node) = child.child_by_field_name("module_name") else {
                    continue;
                };
                let raw = node_text(module_node, source);
                let level = raw.chars().take_while(|c| *c == '.').count();
                let module = raw.trim_start_matches('.').to_string();

                let mut names = Vec::new();
                let mut names_cursor = child.walk();
                for name_node in child.children_by_field_name("name", &mut names_cursor) {
                    if let Some(name) = dotted_text(name_node, source) {
                        names.push(name);
                    }
                }
                imports.push(PyImport {
                    level,
                    module,
                    names,
                });
            }
            _ => collect_imports(child, source, imports),
        }
    }
}

/// Text of a `dotted_name`, unwrapping `aliased_import` (`x as y` binds x).
fn dotted_text(node: Node, source: &str) -> Option<String> {
    let target = if node.kind() == "aliased_import" {
        node.child_by_field_name("name")?
    } else {
        node
    };
    let text = node_text(target, source);
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn node_text(node: Node, source: &str) -> String {
    source[node.byte_range()].trim().to_string()
}

fn read_source(repo_root: &Path, rel: &str) -> Option<String> {
    std::fs::read(repo_root.join(rel))
        .ok()
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

/// Dotted module name for a repo-relative path: `pkg/a.py` -> `pkg.a`,
/// `pkg/__init__.py` -> `pkg`.
fn module_name(path: &str) -> String {
    let stem = path.strip_suffix(".py").unwrap_or(path);
    let dotted = stem.replace('/', ".");
    dotted
        .strip_suffix(".__init__")
        .map(str::to_string)
        .unwrap_or(dotted)
}

/// Detect packages (top-level directories carrying a package marker) and map
/// every module they contain to its file.
fn module_index(files: &[FileRecord]) -> BTreeMap<String, String> {
    let packages: Vec<String> = files
        .iter()
        .filter_map(|f| {
            let (dir, name) = f.path.rsplit_once('/')?;
            (name == "__init__.py" && !dir.contains('/')).then(|| dir.to_string())
        })
        .collect();

    let mut index = BTreeMap::new();
    for file in files {
        if file.language != Language::Python {
            continue;
        }
        let in_package = packages
            .iter()
            .any(|p| file.path.starts_with(&format!("{p}/")));
        if in_package {
            index.insert(module_name(&file.path), file.path.clone());
        }
    }
    index
}

/// Resolve an absolute dotted module for an import, applying the source
/// file's package path for relative levels. Returns `None` when the level
/// escapes the repository root.
fn absolute_module(src: &str, imp: &PyImport) -> Option<String> {
    if imp.level == 0 {
        return Some(imp.module.clone());
    }
    let src_module = module_name(src);
    let src_parts: Vec<&str> = src_module.split('.').collect();
    if imp.level > src_parts.len() {
        return None;
    }
    let mut parts: Vec<String> = src_parts[..src_parts.len() - imp.level]
        .iter()
        .map(|s| s.to_string())
        .collect();
    if !imp.module.is_empty() {
        parts.extend(imp.module.split('.').map(str::to_string));
    }
    Some(parts.join("."))
}

/// Probe `<mod>.py` then `<mod>/__init__.py` against the scanned file set.
fn probe_module(module: &str, paths: &BTreeMap<&str, ()>) -> Option<String> {
    if module.is_empty() {
        return None;
    }
    let base = module.replace('.', "/");
    for candidate in [format!("{base}.py"), format!("{base}/__init__.py")] {
        if paths.contains_key(candidate.as_str()) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(path: &str) -> FileRecord {
        FileRecord {
            path: path.to_string(),
            language: Language::Python,
            loc: 1,
            excerpt: String::new(),
        }
    }

    fn fixture(files: &[(&str, &str)]) -> (TempDir, Vec<FileRecord>) {
        let dir = TempDir::new().unwrap();
        let mut records = Vec::new();
        for (path, content) in files {
            let abs = dir.path().join(path);
            std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
            std::fs::write(abs, content).unwrap();
            records.push(record(path));
        }
        (dir, records)
    }

    #[test]
    fn module_names_collapse_init_files() {
        assert_eq!(module_name("pkg/a.py"), "pkg.a");
        assert_eq!(module_name("pkg/__init__.py"), "pkg");
        assert_eq!(module_name("pkg/sub/b.py"), "pkg.sub.b");
    }

    #[test]
    fn package_pass_resolves_from_import_to_submodule() {
        let (dir, records) = fixture(&[
            ("pkg/__init__.py", ""),
            ("pkg/a.py", "from pkg import b\n"),
            ("pkg/b.py", ""),
        ]);

        let mut extractor = PythonExtractor::new().unwrap();
        let edges = extractor.package_edges(dir.path(), &records);

        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].src, "pkg/a.py");
        assert_eq!(edges[0].dst, "pkg/b.py");
        assert!(edges[0].internal);
    }

    #[test]
    fn relative_imports_apply_declared_level() {
        let (dir, records) = fixture(&[
            ("pkg/__init__.py", ""),
            ("pkg/sub/__init__.py", ""),
            ("pkg/sub/x.py", "from ..util import helper\nfrom . import y\n"),
            ("pkg/sub/y.py", ""),
            ("pkg/util.py", "def helper():\n    pass\n"),
        ]);

        let mut extractor = PythonExtractor::new().unwrap();
        let mut edges = extractor.fallback_edges(dir.path(), &records);
        edges.sort_by(|a, b| a.dst.cmp(&b.dst));

        let dsts: Vec<&str> = edges.iter().map(|e| e.dst.as_str()).collect();
        assert_eq!(dsts, vec!["pkg/sub/y.py", "pkg/util.py"]);
        assert!(edges.iter().all(|e| e.internal));
    }

    #[test]
    fn unresolved_absolute_imports_become_external() {
        let (dir, records) = fixture(&[("pkg/__init__.py", ""), ("pkg/a.py", "import numpy\n")]);

        let mut extractor = PythonExtractor::new().unwrap();
        let edges = extractor.package_edges(dir.path(), &records);

        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].dst, "numpy");
        assert!(!edges[0].internal);
    }

    #[test]
    fn fallback_covers_loose_files_outside_packages() {
        let (dir, records) = fixture(&[
            ("script.py", "import helper\n"),
            ("helper.py", "def run():\n    pass\n"),
        ]);

        let mut extractor = PythonExtractor::new().unwrap();
        assert!(extractor.package_edges(dir.path(), &records).is_empty());

        let edges = extractor.fallback_edges(dir.path(), &records);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].dst, "helper.py");
        assert!(edges[0].internal);
    }
}
