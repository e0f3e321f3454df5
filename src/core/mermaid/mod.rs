//! Mermaid flowchart tooling: deterministic builders, the syntactic
//! validator, and the rule-based repairer used by the self-correction loop.

mod builders;
mod folders;
mod repair;
mod validator;

use serde::{Deserialize, Serialize};

pub use builders::{modules_mermaid, rule_based_diagram};
pub use folders::folders_mermaid;
pub use repair::repair;
pub use validator::{validate, Finding, FindingKind, ValidationReport};

/// LLM-generated diagram flavors, each with a complexity budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagramMode {
    Overview,
    Balanced,
    Detailed,
}

impl DiagramMode {
    pub const ALL: [DiagramMode; 3] = [
        DiagramMode::Overview,
        DiagramMode::Balanced,
        DiagramMode::Detailed,
    ];

    pub fn max_nodes(&self) -> usize {
        match self {
            DiagramMode::Overview => 20,
            DiagramMode::Balanced => 50,
            DiagramMode::Detailed => 100,
        }
    }

    pub fn max_edges(&self) -> usize {
        match self {
            DiagramMode::Overview => 25,
            DiagramMode::Balanced => 75,
            DiagramMode::Detailed => 150,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DiagramMode::Overview => "overview",
            DiagramMode::Balanced => "balanced",
            DiagramMode::Detailed => "detailed",
        }
    }

    /// Artifact key in the persisted result. The overview mode keeps its
    /// historical `simple` key.
    pub fn artifact_key(&self) -> &'static str {
        match self {
            DiagramMode::Overview => "mermaid_modules_simple",
            DiagramMode::Balanced => "mermaid_modules_balanced",
            DiagramMode::Detailed => "mermaid_modules_detailed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "overview" | "simple" => Some(DiagramMode::Overview),
            "balanced" => Some(DiagramMode::Balanced),
            "detailed" => Some(DiagramMode::Detailed),
            _ => None,
        }
    }
}

impl std::fmt::Display for DiagramMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Make a string safe for Mermaid node ids: alphanumerics and underscores,
/// never starting with a digit.
pub fn safe_node_id(raw: &str) -> String {
    let mut id: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if id.chars().next().map_or(true, |c| c.is_ascii_digit()) {
        id.insert_str(0, "n_");
    }
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_budgets_match_documented_limits() {
        assert_eq!(
            (DiagramMode::Overview.max_nodes(), DiagramMode::Overview.max_edges()),
            (20, 25)
        );
        assert_eq!(
            (DiagramMode::Balanced.max_nodes(), DiagramMode::Balanced.max_edges()),
            (50, 75)
        );
        assert_eq!(
            (DiagramMode::Detailed.max_nodes(), DiagramMode::Detailed.max_edges()),
            (100, 150)
        );
    }

    #[test]
    fn overview_accepts_legacy_simple_spelling() {
        assert_eq!(DiagramMode::parse("simple"), Some(DiagramMode::Overview));
        assert_eq!(DiagramMode::parse("overview"), Some(DiagramMode::Overview));
        assert_eq!(DiagramMode::parse("folders"), None);
    }

    #[test]
    fn node_ids_never_start_with_digits() {
        assert_eq!(safe_node_id("src/app.ts"), "src_app_ts");
        assert_eq!(safe_node_id("3d-utils"), "n_3d_utils");
    }
}
