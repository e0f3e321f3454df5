use std::collections::BTreeSet;

use super::safe_node_id;

/// Render the directory tree of a file path set as a `flowchart TD`.
///
/// A pure function of its input: one node per directory, an edge from each
/// parent directory to each child directory, everything emitted in sorted
/// order so repeated runs are byte-identical.
pub fn folders_mermaid(file_paths: &[String]) -> String {
    let mut directories: BTreeSet<String> = BTreeSet::new();
    for path in file_paths {
        let mut current = path.as_str();
        while let Some((dir, _)) = current.rsplit_once('/') {
            directories.insert(dir.to_string());
            current = dir;
        }
    }

    let mut lines = vec!["flowchart TD".to_string()];
    for dir in &directories {
        let label = dir.rsplit_once('/').map(|(_, leaf)| leaf).unwrap_or(dir);
        lines.push(format!("    {}[\"{}\"]", safe_node_id(dir), label));
    }
    for dir in &directories {
        if let Some((parent, _)) = dir.rsplit_once('/') {
            if directories.contains(parent) {
                lines.push(format!(
                    "    {} --> {}",
                    safe_node_id(parent),
                    safe_node_id(dir)
                ));
            }
        }
    }

    lines.join("\n") + "\n"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mermaid::validate;

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn renders_directory_hierarchy() {
        let diagram = folders_mermaid(&paths(&[
            "src/app.ts",
            "src/api/index.ts",
            "src/api/client.ts",
            "tests/e2e.ts",
        ]));

        assert!(diagram.starts_with("flowchart TD\n"));
        assert!(diagram.contains("src[\"src\"]"));
        assert!(diagram.contains("src_api[\"api\"]"));
        assert!(diagram.contains("src --> src_api"));
        assert!(!diagram.contains("app"), "files must not appear");
        assert!(validate(&diagram, None).is_valid());
    }

    #[test]
    fn is_byte_identical_across_runs() {
        let input = paths(&["b/x.py", "a/y.py", "a/z/w.py"]);
        assert_eq!(folders_mermaid(&input), folders_mermaid(&input));
    }

    #[test]
    fn empty_input_yields_bare_header() {
        assert_eq!(folders_mermaid(&[]), "flowchart TD\n");
    }

    #[test]
    fn root_level_files_produce_no_nodes() {
        assert_eq!(folders_mermaid(&paths(&["main.py"])), "flowchart TD\n");
    }
}
