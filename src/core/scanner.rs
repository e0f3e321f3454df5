use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::config::AnalysisConfig;
use crate::error::{CartographError, Result};

/// Languages the analysis understands, detected from file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Jsx,
    Typescript,
    Tsx,
}

impl Language {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "py" => Some(Language::Python),
            "js" => Some(Language::Javascript),
            "jsx" => Some(Language::Jsx),
            "ts" => Some(Language::Typescript),
            "tsx" => Some(Language::Tsx),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Jsx => "jsx",
            Language::Typescript => "typescript",
            Language::Tsx => "tsx",
        }
    }

    /// True for the JS/TS family handled by the script-import extractor.
    pub fn is_script(&self) -> bool {
        !matches!(self, Language::Python)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One supported source file found during the scan.
///
/// Paths are repo-relative with forward slashes on every host OS. `loc` is
/// the non-empty line count, which is stable across line-ending styles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    pub language: Language,
    pub loc: usize,
    /// First portion of the file content, kept for prompt assembly
    pub excerpt: String,
}

/// Walks a repository tree and collects [`FileRecord`]s for supported files.
pub struct FileScanner {
    supported_extensions: Vec<String>,
    excluded_dirs: Vec<String>,
    excerpt_chars: usize,
}

impl FileScanner {
    pub fn new(config: &AnalysisConfig) -> Self {
        Self {
            supported_extensions: config.supported_extensions.clone(),
            excluded_dirs: config.excluded_dirs.clone(),
            excerpt_chars: config.excerpt_chars,
        }
    }

    /// Scan the tree rooted at `repo_root`, skipping hidden directories and
    /// anything on the exclusion list. Results are sorted by path.
    pub fn scan(&self, repo_root: &Path) -> Result<Vec<FileRecord>> {
        if !repo_root.is_dir() {
            return Err(CartographError::Scan(format!(
                "repository root {} is not a directory",
                repo_root.display()
            )));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(repo_root)
            .into_iter()
            .filter_entry(|e| self.keep_entry(e));

        for entry in walker {
            let entry = entry.map_err(|e| CartographError::Scan(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let ext = match entry.path().extension().and_then(|e| e.to_str()) {
                Some(ext) => ext.to_ascii_lowercase(),
                None => continue,
            };
            if !self.supported_extensions.iter().any(|e| *e == ext) {
                continue;
            }
            let language = match Language::from_extension(&ext) {
                Some(lang) => lang,
                None => continue,
            };

            let content = match std::fs::read(entry.path()) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) => {
                    debug!("Skipping unreadable file {}: {}", entry.path().display(), e);
                    continue;
                }
            };

            let rel = entry
                .path()
                .strip_prefix(repo_root)
                .map_err(|e| CartographError::Scan(e.to_string()))?;
            let path = normalize_path(rel);

            files.push(FileRecord {
                path,
                language,
                loc: non_empty_lines(&content),
                excerpt: truncate_chars(&content, self.excerpt_chars),
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    fn keep_entry(&self, entry: &DirEntry) -> bool {
        if entry.depth() == 0 || !entry.file_type().is_dir() {
            return true;
        }
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            return false;
        }
        !self.excluded_dirs.iter().any(|d| d.as_str() == name)
    }
}

/// Per-language file share, as percentages rounded to one decimal.
pub fn language_stats(files: &[FileRecord]) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for file in files {
        *counts.entry(file.language.as_str().to_string()).or_default() += 1;
    }
    let total = counts.values().sum::<usize>().max(1) as f64;
    counts
        .into_iter()
        .map(|(lang, n)| (lang, (n as f64 * 1000.0 / total).round() / 10.0))
        .collect()
}

pub fn loc_total(files: &[FileRecord]) -> usize {
    files.iter().map(|f| f.loc).sum()
}

fn normalize_path(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn non_empty_lines(content: &str) -> usize {
    content.lines().filter(|l| !l.trim().is_empty()).count()
}

fn truncate_chars(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn scans_supported_files_and_skips_caches() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "src/app.ts", "export const x = 1;\n");
        write(dir.path(), "pkg/a.py", "import os\n\nprint(1)\n");
        write(dir.path(), "node_modules/react/index.js", "module.exports = {};\n");
        write(dir.path(), ".hidden/secret.py", "x = 1\n");
        write(dir.path(), "README.md", "# readme\n");

        let scanner = FileScanner::new(&crate::config::Config::default().analysis);
        let files = scanner.scan(dir.path()).unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();

        assert_eq!(paths, vec!["pkg/a.py", "src/app.ts"]);
    }

    #[test]
    fn loc_counts_non_empty_lines_only() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.py", "x = 1\n\n\ny = 2\n   \n");

        let scanner = FileScanner::new(&crate::config::Config::default().analysis);
        let files = scanner.scan(dir.path()).unwrap();
        assert_eq!(files[0].loc, 2);
    }

    #[test]
    fn language_percentages_sum_to_one_hundred() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.py", "x = 1\n");
        write(dir.path(), "b.ts", "const y = 2;\n");
        write(dir.path(), "c.ts", "const z = 3;\n");

        let scanner = FileScanner::new(&crate::config::Config::default().analysis);
        let files = scanner.scan(dir.path()).unwrap();
        let stats = language_stats(&files);

        let sum: f64 = stats.values().sum();
        assert!((sum - 100.0).abs() <= 0.3, "sum was {sum}");
        assert_eq!(stats.get("python"), Some(&33.3));
        assert_eq!(stats.get("typescript"), Some(&66.7));
    }

    #[test]
    fn excerpt_is_bounded() {
        let dir = TempDir::new().unwrap();
        let long = "x".repeat(5000);
        write(dir.path(), "big.js", &long);

        let scanner = FileScanner::new(&crate::config::Config::default().analysis);
        let files = scanner.scan(dir.path()).unwrap();
        assert_eq!(files[0].excerpt.chars().count(), 1400);
    }
}
