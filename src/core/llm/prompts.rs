//! Prompt text for every LLM-backed generation task.

use super::super::mermaid::DiagramMode;

pub const OVERVIEW_SYSTEM: &str = "You are summarizing a repository into an Architecture overview. \
Use only facts grounded in provided files and metrics. If unsure, say 'unknown'.";

pub const OVERVIEW_INSTRUCTIONS: &str = "Write a clear, senior-level Architecture.md with sections: \
Overview, Component Map, Data Flow, Risks, How to Extend. Keep it concise and practical.";

pub const COMPONENT_SYSTEM: &str = "You are a software architect analyzing code to identify architectural components. \
Your response must be valid JSON only - no markdown, no explanations, no code blocks. \
Analyze the provided files and return a single JSON object representing one architectural component.";

pub const COMPONENT_SHAPE: &str = r#"Return a JSON object with this exact structure:
{
  "name": "ComponentName",
  "purpose": "Brief description of what this component does",
  "key_files": [
    {"path": "file/path.py", "reason": "Why this file is important"}
  ],
  "apis": [
    {"name": "function_name", "file": "file/path.py"}
  ],
  "dependencies": ["dependency1", "dependency2"],
  "risks": ["potential risk or concern"],
  "tests": ["test_file.py"]
}

Respond with ONLY the JSON object, no other text:"#;

pub const MERMAID_COMMON_SYSTEM: &str = "You are a software architect that outputs a Mermaid flowchart showing system architecture. \
Audience varies by mode. Optimize for clarity first, detail second. \
Work only with the provided repo context. Do not invent components that do not exist.\n\n\
OUTPUT RULES\n\
- Return ONLY Mermaid code starting with 'flowchart TB'. No backticks. No preface text. \
- Prefer short labels. Trim to <= 24 chars. Use Title Case for nodes. \
- Use at most one edge label per link, wrapped in double quotes. Example: A -- \"Auth\" --> B \
- Quote any label containing spaces, parentheses, or punctuation inside brackets. Example: SVC[\"Auth Service\"] \
- Node ids contain no spaces. \
- No duplicate edges between the same pair. \
- If a budget would be exceeded, collapse into 'Other ...' nodes and skip low-signal edges.";

pub const MERMAID_CORRECTION_SYSTEM: &str = "You are a Mermaid diagram syntax expert. Your ONLY job is to fix the specific syntax errors provided. \
You MUST return a corrected diagram that renders without errors. \
Make MINIMAL changes - only fix what's broken, preserve everything else exactly. \
The error messages tell you exactly what is wrong and where.";

/// Per-mode policy block appended to the diagram prompt. Budgets quoted
/// here are the same numbers the validator enforces.
pub fn mode_policy(mode: DiagramMode) -> String {
    let (audience, goal, rules) = match mode {
        DiagramMode::Overview => (
            "Non-technical stakeholders.",
            "Explain what the system is and how major parts interact.",
            "- Do not use subgraph. Show only the big components and a single main path.\n\
             - Do not include tests, config, or tooling. No file or class names.",
        ),
        DiagramMode::Balanced => (
            "Engineers and technical stakeholders.",
            "Show layered modules and key integrations without noise.",
            "- Use subgraphs to represent layers. Nodes are modules or folders, never individual files.\n\
             - Collapse small or niche modules into 'Other Services' or 'Other Data'.",
        ),
        DiagramMode::Detailed => (
            "Senior engineers and leads.",
            "Expose important module relationships without dropping to file-level.",
            "- Use modules, packages, or feature folders only.\n\
             - Keep only high-signal dependencies and collapse low-usage ones into 'Other ...'.",
        ),
    };

    format!(
        "MODE = {}\nAUDIENCE: {}\nGOAL: {}\nBUDGETS: max_nodes={}, max_edges={}\nRULES\n{}\n\
         OUTPUT: Mermaid starting with 'flowchart TB'.\n\
         Return ONLY the Mermaid diagram code, starting with 'flowchart TB':",
        mode.as_str().to_uppercase(),
        audience,
        goal,
        mode.max_nodes(),
        mode.max_edges(),
        rules
    )
}

/// The shape-repair preamble used for the single corrective retry on
/// structured responses.
pub fn shape_repair_prefix(system: &str) -> String {
    format!(
        "{system} Return ONLY valid JSON matching the requested shape.\n\n\
         The previous output was invalid. Fix it."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_policies_quote_the_enforced_budgets() {
        for mode in DiagramMode::ALL {
            let policy = mode_policy(mode);
            assert!(policy.contains(&format!("max_nodes={}", mode.max_nodes())));
            assert!(policy.contains(&format!("max_edges={}", mode.max_edges())));
        }
    }
}
