use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CartographError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Model fallback chain, in order of preference
    pub model_fallback_order: Vec<String>,

    /// API key for the model provider
    pub api_key: Option<String>,

    /// Base URL for the model provider (overridable for self-hosted gateways)
    pub base_url: Option<String>,

    /// Attempts per model before moving to the next one
    pub max_retries_per_model: u32,

    /// Minimum delay between retries, in seconds
    pub retry_min_delay_secs: f64,

    /// Maximum delay between retries, in seconds
    pub retry_max_delay_secs: f64,

    /// Deadline for a single model call, in seconds
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// How many top-centrality files feed the LLM stages
    pub top_files: usize,

    /// Maximum number of component records to extract
    pub component_count: usize,

    /// Bounded attempts for the diagram self-correction loop
    pub max_diagram_attempts: u32,

    /// Overall deadline for the LLM-involving phase, in seconds
    pub run_deadline_secs: u64,

    /// Characters of file content kept as excerpt
    pub excerpt_chars: usize,

    /// File extensions the scanner keeps (a subset of the understood set)
    pub supported_extensions: Vec<String>,

    /// Directory names pruned during the scan
    pub excluded_dirs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Root directory for per-run clone workspaces
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// LLM gateway settings
    pub llm: LlmConfig,

    /// Analysis tuning
    pub analysis: AnalysisConfig,

    /// Workspace settings
    pub workspace: WorkspaceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                model_fallback_order: vec![
                    "gemini-2.5-flash-lite".to_string(),
                    "gemini-2.5-flash".to_string(),
                    "gemini-2.0-flash".to_string(),
                    "gemini-2.0-flash-lite".to_string(),
                ],
                api_key: None,
                base_url: None,
                max_retries_per_model: 2,
                retry_min_delay_secs: 1.0,
                retry_max_delay_secs: 2.0,
                call_timeout_secs: 60,
            },
            analysis: AnalysisConfig {
                top_files: 40,
                component_count: 8,
                max_diagram_attempts: 3,
                run_deadline_secs: 300,
                excerpt_chars: 1400,
                supported_extensions: ["py", "js", "jsx", "ts", "tsx"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
                excluded_dirs: vec![
                    ".git".to_string(),
                    "node_modules".to_string(),
                    "dist".to_string(),
                    "build".to_string(),
                    ".next".to_string(),
                    ".venv".to_string(),
                    "venv".to_string(),
                    "__pycache__".to_string(),
                    "migrations".to_string(),
                    "coverage".to_string(),
                    "snapshots".to_string(),
                    "vendor".to_string(),
                    "target".to_string(),
                ],
            },
            workspace: WorkspaceConfig {
                work_dir: std::env::temp_dir().join("cartograph"),
            },
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config =
            toml::from_str(&content).map_err(|e| CartographError::Config(e.to_string()))?;
        config.apply_env();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| CartographError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration with fallback to default
    pub fn load_or_default<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        match path {
            Some(p) => {
                if p.as_ref().exists() {
                    Self::load(p)
                } else {
                    Ok(Self::default_with_env())
                }
            }
            None => {
                let candidates = ["Cartograph.toml", "cartograph.toml", ".cartograph.toml"];

                for candidate in &candidates {
                    if Path::new(candidate).exists() {
                        return Self::load(candidate);
                    }
                }

                Ok(Self::default_with_env())
            }
        }
    }

    fn default_with_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Environment overrides take precedence over the config file.
    fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("GEMINI_API_KEY") {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Ok(dir) = std::env::var("CARTOGRAPH_WORK_DIR") {
            if !dir.is_empty() {
                self.workspace.work_dir = PathBuf::from(dir);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.analysis.top_files, 40);
        assert_eq!(back.analysis.component_count, 8);
        assert_eq!(back.llm.model_fallback_order.len(), 4);
    }

    #[test]
    fn excluded_dirs_cover_dependency_caches() {
        let config = Config::default();
        for dir in ["node_modules", "__pycache__", ".git", "vendor"] {
            assert!(config.analysis.excluded_dirs.iter().any(|d| d == dir));
        }
    }
}
