//! Helpers for cleaning model output before it is parsed.

/// Strip a wrapping markdown code fence, if any.
pub fn clean_markdown(response: &str) -> String {
    let text = response.trim();
    if !text.starts_with("```") {
        return text.to_string();
    }

    let mut lines: Vec<&str> = text.lines().collect();
    if lines.first().map_or(false, |l| l.starts_with("```")) {
        lines.remove(0);
    }
    if lines.last().map_or(false, |l| l.trim() == "```") {
        lines.pop();
    }
    lines.join("\n").trim().to_string()
}

/// Extract the first `{ ... }` block and parse it. Models routinely wrap
/// JSON in prose or fences; everything outside the braces is ignored.
pub fn extract_json_object(response: &str) -> Option<serde_json::Value> {
    let start = response.find('{')?;
    let end = response.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&response[start..=end]).ok()
}

/// Extract the Mermaid body: everything from the first `flowchart`/`graph`
/// line onward with fence markers removed, or the whole trimmed response
/// when no header is present.
pub fn extract_mermaid(response: &str) -> String {
    let lines: Vec<&str> = response.lines().collect();
    let start = lines.iter().position(|l| {
        let s = l.trim().to_lowercase();
        s.starts_with("flowchart") || s.starts_with("graph")
    });

    let body: Vec<&str> = match start {
        Some(idx) => lines[idx..]
            .iter()
            .filter(|l| {
                let s = l.trim();
                s != "```" && s != "```mermaid"
            })
            .copied()
            .collect(),
        None => return response.trim().to_string(),
    };
    body.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_markdown_unwraps_fences() {
        assert_eq!(clean_markdown("```markdown\n# Title\n```"), "# Title");
        assert_eq!(clean_markdown("# Title"), "# Title");
    }

    #[test]
    fn extract_json_ignores_surrounding_prose() {
        let value =
            extract_json_object("Here you go:\n```json\n{\"name\": \"core\"}\n```").unwrap();
        assert_eq!(value["name"], "core");
    }

    #[test]
    fn extract_json_rejects_braceless_text() {
        assert!(extract_json_object("no json here").is_none());
    }

    #[test]
    fn extract_mermaid_drops_preamble_and_fences() {
        let response = "Sure, here is the diagram:\n```mermaid\nflowchart TB\nA --> B\n```";
        assert_eq!(extract_mermaid(response), "flowchart TB\nA --> B");
    }

    #[test]
    fn extract_mermaid_keeps_headerless_output_as_is() {
        assert_eq!(extract_mermaid("A --> B\n"), "A --> B");
    }
}
