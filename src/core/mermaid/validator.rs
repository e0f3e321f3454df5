use std::collections::BTreeSet;

use regex::Regex;

use super::DiagramMode;

/// What the validator can report. The first five kinds are errors with a
/// rule-based repair; the rest are non-blocking lints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FindingKind {
    MissingHeader,
    UnbalancedSubgraph { opens: usize, closes: usize },
    IdentifierSpace,
    ParenthesizedLabel,
    OverBudget { nodes: usize, edges: usize },
    SuspiciousEdge,
    HtmlishLabel,
    LongIdentifier,
}

impl FindingKind {
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            FindingKind::MissingHeader
                | FindingKind::UnbalancedSubgraph { .. }
                | FindingKind::IdentifierSpace
                | FindingKind::ParenthesizedLabel
                | FindingKind::OverBudget { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct Finding {
    pub kind: FindingKind,
    /// 1-based line, 0 for whole-document findings
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn errors(&self) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(|f| f.kind.is_error())
    }

    pub fn error_count(&self) -> usize {
        self.errors().count()
    }

    pub fn is_valid(&self) -> bool {
        self.error_count() == 0
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors().map(|f| f.message.clone()).collect()
    }
}

/// Lines that are never node or edge statements.
const IGNORE_PREFIXES: [&str; 7] = [
    "%%",
    "classDef",
    "class ",
    "style ",
    "linkStyle",
    "direction",
    "subgraph",
];

/// Pure-text syntactic check of a Mermaid flowchart. Runs without any
/// renderer; with a mode supplied, node and edge counts are checked against
/// its complexity budget.
pub fn validate(diagram: &str, budget: Option<DiagramMode>) -> ValidationReport {
    let arrow_re = Regex::new(r"[-=.]{1,3}>").expect("static regex");
    let paren_label_re =
        Regex::new(r"[A-Za-z_][\w-]*\[[^\x22\]\[]*\([^\x22\]\[]*\)[^\x22\]\[]*\]")
            .expect("static regex");

    let mut findings = Vec::new();

    if !has_header(diagram) {
        findings.push(Finding {
            kind: FindingKind::MissingHeader,
            line: 1,
            message: "Missing diagram type declaration. Add 'flowchart LR' or 'graph TD' at the top."
                .to_string(),
        });
    }

    let opens = diagram
        .lines()
        .filter(|l| l.trim().starts_with("subgraph"))
        .count();
    let closes = diagram.lines().filter(|l| l.trim() == "end").count();
    if opens != closes {
        findings.push(Finding {
            kind: FindingKind::UnbalancedSubgraph { opens, closes },
            line: 0,
            message: format!("Unbalanced subgraph blocks: subgraph={opens}, end={closes}."),
        });
    }

    let mut node_ids: BTreeSet<String> = BTreeSet::new();
    let mut edge_count = 0usize;

    for (idx, raw_line) in diagram.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty()
            || line == "end"
            || IGNORE_PREFIXES.iter().any(|p| line.starts_with(p))
            || is_header_line(line)
        {
            continue;
        }

        if paren_label_re.is_match(line) {
            findings.push(Finding {
                kind: FindingKind::ParenthesizedLabel,
                line: line_no,
                message: format!(
                    "Line {line_no}: unquoted parentheses in a node label; wrap the label in double quotes."
                ),
            });
        }

        let arrows = arrow_re.find_iter(line).count();
        edge_count += arrows;

        let mut bad_endpoint = false;
        for segment in arrow_re.split(line) {
            match endpoint_identifier(segment) {
                Some(id) if id.is_empty() => bad_endpoint = arrows > 0,
                Some(id) => {
                    // `A --> B & C` fans out to several endpoints.
                    for part in id.split('&').map(str::trim).filter(|p| !p.is_empty()) {
                        if part.split_whitespace().count() > 1 {
                            findings.push(Finding {
                                kind: FindingKind::IdentifierSpace,
                                line: line_no,
                                message: format!(
                                    "Line {line_no}: identifier '{part}' contains a space."
                                ),
                            });
                        }
                        let compact = part.replace(char::is_whitespace, "_");
                        if compact.len() > 40 {
                            findings.push(Finding {
                                kind: FindingKind::LongIdentifier,
                                line: line_no,
                                message: format!("Line {line_no}: node id is very long."),
                            });
                        }
                        node_ids.insert(compact);
                    }
                }
                None => {}
            }
        }
        if bad_endpoint {
            findings.push(Finding {
                kind: FindingKind::SuspiciousEdge,
                line: line_no,
                message: format!("Line {line_no}: edge looks unusual for flowchart syntax."),
            });
        }

        for label in bracket_labels(line) {
            if label.contains('<') {
                findings.push(Finding {
                    kind: FindingKind::HtmlishLabel,
                    line: line_no,
                    message: format!("Line {line_no}: label contains '<' which may be HTML-like."),
                });
            }
        }
    }

    if let Some(mode) = budget {
        if node_ids.len() > mode.max_nodes() || edge_count > mode.max_edges() {
            findings.push(Finding {
                kind: FindingKind::OverBudget {
                    nodes: node_ids.len(),
                    edges: edge_count,
                },
                line: 0,
                message: format!(
                    "Diagram exceeds the {} budget: {} nodes (max {}), {} edges (max {}).",
                    mode,
                    node_ids.len(),
                    mode.max_nodes(),
                    edge_count,
                    mode.max_edges()
                ),
            });
        }
    }

    ValidationReport { findings }
}

fn is_header_line(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.starts_with("flowchart") || lower.starts_with("graph")
}

/// The first non-empty, non-comment line must declare the diagram type.
pub(super) fn has_header(diagram: &str) -> bool {
    diagram
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("%%"))
        .map(is_header_line)
        .unwrap_or(false)
}

/// Extract the identifier part of one edge-split segment, with edge labels
/// and node shapes stripped. Returns `None` for segments that are pure edge
/// decoration.
fn endpoint_identifier(segment: &str) -> Option<String> {
    let mut text = segment.trim();

    // Source-side segments keep their stroke: `A --` or `A -- "label" `.
    for stroke in ["--", "==", "-."] {
        if let Some(pos) = text.find(stroke) {
            text = text[..pos].trim();
        }
    }
    // Leading edge labels on the destination side: `|guard| B` / `"label" B`.
    if text.starts_with('|') {
        text = text.splitn(3, '|').nth(2).unwrap_or("").trim();
    }
    if text.starts_with('"') {
        text = text[1..].splitn(2, '"').nth(1).unwrap_or("").trim();
    }

    // Node shape opens the label; the id is everything before it.
    let id_end = text
        .find(|c| matches!(c, '[' | '(' | '{' | ':'))
        .unwrap_or(text.len());
    let id = text[..id_end].trim();
    if id.is_empty() && text.is_empty() {
        return None;
    }
    Some(id.to_string())
}

fn bracket_labels(line: &str) -> Vec<&str> {
    let mut labels = Vec::new();
    let mut rest = line;
    while let Some(start) = rest.find('[') {
        let Some(len) = rest[start + 1..].find(']') else {
            break;
        };
        labels.push(&rest[start + 1..start + 1 + len]);
        rest = &rest[start + 1 + len..];
    }
    labels
}
