use std::collections::{BTreeMap, BTreeSet};

use regex::Regex;

use super::validator::{has_header, Finding, FindingKind, ValidationReport};
use super::DiagramMode;

/// Apply the rule-based fix for every repairable finding in `report`.
///
/// The repairer is idempotent: repairing an already-repaired diagram yields
/// the same text. A surplus of `end` lines is the one unrepairable case and
/// is left for the LLM pass.
pub fn repair(diagram: &str, report: &ValidationReport, budget: Option<DiagramMode>) -> String {
    let mut current = diagram.to_string();

    let space_lines: BTreeSet<usize> = report
        .findings
        .iter()
        .filter(|f| f.kind == FindingKind::IdentifierSpace)
        .map(|f| f.line)
        .collect();
    if !space_lines.is_empty() {
        current = fix_identifier_spaces(&current, &space_lines);
    }

    if has_finding(report, |k| matches!(k, FindingKind::ParenthesizedLabel)) {
        current = quote_parenthesized_labels(&current);
    }

    if has_finding(report, |k| matches!(k, FindingKind::MissingHeader)) && !has_header(&current) {
        current = format!("flowchart LR\n{current}");
    }

    if has_finding(report, |k| matches!(k, FindingKind::UnbalancedSubgraph { .. })) {
        let opens = current
            .lines()
            .filter(|l| l.trim().starts_with("subgraph"))
            .count();
        let closes = current.lines().filter(|l| l.trim() == "end").count();
        if opens > closes {
            let mut trimmed = current.trim_end().to_string();
            for _ in closes..opens {
                trimmed.push_str("\nend");
            }
            trimmed.push('\n');
            current = trimmed;
        }
    }

    if let (Some(mode), true) = (
        budget,
        has_finding(report, |k| matches!(k, FindingKind::OverBudget { .. })),
    ) {
        current = prune_to_budget(&current, mode);
    }

    current
}

fn has_finding(report: &ValidationReport, pred: impl Fn(&FindingKind) -> bool) -> bool {
    report.findings.iter().any(|f: &Finding| pred(&f.kind))
}

fn arrow_re() -> Regex {
    Regex::new(r"[-=.]{1,3}>").expect("static regex")
}

/// Replace identifier-internal spaces with `_` on the flagged lines only;
/// labels and edge text are left untouched.
fn fix_identifier_spaces(diagram: &str, lines: &BTreeSet<usize>) -> String {
    let arrow = arrow_re();
    diagram
        .lines()
        .enumerate()
        .map(|(idx, line)| {
            if lines.contains(&(idx + 1)) {
                fix_line(line, &arrow)
            } else {
                line.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
        + if diagram.ends_with('\n') { "\n" } else { "" }
}

fn fix_line(line: &str, arrow: &Regex) -> String {
    let mut result = String::new();
    let mut last = 0;
    for m in arrow.find_iter(line) {
        result.push_str(&fix_segment(&line[last..m.start()]));
        result.push_str(m.as_str());
        last = m.end();
    }
    result.push_str(&fix_segment(&line[last..]));
    result
}

fn fix_segment(segment: &str) -> String {
    // Source-side segments keep a trailing stroke and possibly an edge label.
    let stroke_pos = ["--", "==", "-."]
        .iter()
        .filter_map(|s| segment.find(s))
        .min();
    let (head, tail) = match stroke_pos {
        Some(pos) => segment.split_at(pos),
        None => (segment, ""),
    };

    let trimmed = head.trim_start();
    if trimmed.starts_with('|') || trimmed.starts_with('"') {
        return segment.to_string();
    }

    let id_end = head
        .find(|c| matches!(c, '[' | '(' | '{' | ':'))
        .unwrap_or(head.len());
    let (id_zone, rest) = head.split_at(id_end);

    let leading: String = id_zone.chars().take_while(|c| c.is_whitespace()).collect();
    let core = id_zone.trim();
    // `&` separates endpoints in a fan-out; spaces are joined within each.
    if !core
        .split('&')
        .any(|part| part.trim().split_whitespace().count() > 1)
    {
        return segment.to_string();
    }

    let joined = core
        .split('&')
        .map(|part| {
            part.trim()
                .split_whitespace()
                .fold(String::new(), |acc, word| {
                    if acc.is_empty() {
                        word.to_string()
                    } else {
                        format!("{}_{}", acc.trim_end_matches('_'), word.trim_start_matches('_'))
                    }
                })
        })
        .collect::<Vec<_>>()
        .join(" & ");
    // Keep one trailing space before a bare stroke so edges stay readable.
    let spacer = if rest.is_empty() && !tail.is_empty() { " " } else { "" };
    format!("{leading}{joined}{spacer}{rest}{tail}")
}

/// `ID[text (with parens)]` -> `ID["text (with parens)"]`. Quoted labels no
/// longer match the pattern, so a second application is a no-op.
fn quote_parenthesized_labels(diagram: &str) -> String {
    let re = Regex::new(r"([A-Za-z_][\w-]*)\[([^\x22\]\[]*\([^\x22\]\[]*\)[^\x22\]\[]*)\]")
        .expect("static regex");
    re.replace_all(diagram, "$1[\"$2\"]").into_owned()
}

/// Drop the lowest-connectivity nodes (and any edge that references them)
/// until the diagram fits the mode budget, then trim excess edges from the
/// bottom.
fn prune_to_budget(diagram: &str, mode: DiagramMode) -> String {
    let arrow = arrow_re();
    let lines: Vec<&str> = diagram.lines().collect();
    let mut keep: Vec<bool> = vec![true; lines.len()];

    loop {
        let (node_degrees, edge_lines) = survey(&lines, &keep, &arrow);
        if node_degrees.len() <= mode.max_nodes() {
            let excess = edge_count(&edge_lines).saturating_sub(mode.max_edges());
            if excess > 0 {
                trim_edges(&mut keep, &edge_lines, excess);
            }
            break;
        }

        // Lowest degree first; among equals the lexicographically last id
        // goes, which keeps pruning deterministic.
        let victim = node_degrees
            .iter()
            .min_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
            .map(|(id, _)| id.clone())
            .expect("non-empty node set");

        for (idx, line) in lines.iter().enumerate() {
            if keep[idx] && line_mentions(line, &victim, &arrow) {
                keep[idx] = false;
            }
        }
    }

    let mut kept: Vec<&str> = lines
        .iter()
        .zip(&keep)
        .filter_map(|(l, k)| k.then_some(*l))
        .collect();
    // Pruning node lines can leave empty subgraph shells; that is valid
    // Mermaid, so they stay.
    if kept.last().map_or(false, |l| !l.is_empty()) && diagram.ends_with('\n') {
        kept.push("");
    }
    kept.join("\n")
}

type Degrees = BTreeMap<String, usize>;

fn survey(lines: &[&str], keep: &[bool], arrow: &Regex) -> (Degrees, Vec<(usize, usize)>) {
    let mut degrees: Degrees = BTreeMap::new();
    let mut edge_lines = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        if !keep[idx] {
            continue;
        }
        let ids = statement_ids(line, arrow);
        if ids.is_empty() {
            continue;
        }
        let arrows = arrow.find_iter(line).count();
        if arrows > 0 {
            edge_lines.push((idx, arrows));
        }
        for id in ids {
            *degrees.entry(id).or_insert(0) += arrows;
        }
    }
    (degrees, edge_lines)
}

fn edge_count(edge_lines: &[(usize, usize)]) -> usize {
    edge_lines.iter().map(|(_, n)| n).sum()
}

fn trim_edges(keep: &mut [bool], edge_lines: &[(usize, usize)], mut excess: usize) {
    for (idx, arrows) in edge_lines.iter().rev() {
        if excess == 0 {
            break;
        }
        keep[*idx] = false;
        excess = excess.saturating_sub(*arrows);
    }
}

fn statement_ids(line: &str, arrow: &Regex) -> Vec<String> {
    let trimmed = line.trim();
    if trimmed.is_empty()
        || trimmed == "end"
        || trimmed.starts_with("%%")
        || trimmed.starts_with("classDef")
        || trimmed.starts_with("class ")
        || trimmed.starts_with("style ")
        || trimmed.starts_with("linkStyle")
        || trimmed.starts_with("direction")
        || trimmed.starts_with("subgraph")
    {
        return Vec::new();
    }
    let lower = trimmed.to_lowercase();
    if lower.starts_with("flowchart") || lower.starts_with("graph") {
        return Vec::new();
    }

    let mut ids = Vec::new();
    for segment in arrow.split(trimmed) {
        let mut text = segment.trim();
        for stroke in ["--", "==", "-."] {
            if let Some(pos) = text.find(stroke) {
                text = text[..pos].trim();
            }
        }
        if text.starts_with('|') {
            text = text.splitn(3, '|').nth(2).unwrap_or("").trim();
        }
        if text.starts_with('"') {
            text = text[1..].splitn(2, '"').nth(1).unwrap_or("").trim();
        }
        let id_end = text
            .find(|c| matches!(c, '[' | '(' | '{' | ':'))
            .unwrap_or(text.len());
        for part in text[..id_end].split('&').map(str::trim) {
            if !part.is_empty() {
                ids.push(part.replace(char::is_whitespace, "_"));
            }
        }
    }
    ids
}

fn line_mentions(line: &str, id: &str, arrow: &Regex) -> bool {
    statement_ids(line, arrow).iter().any(|i| i == id)
}

#[cfg(test)]
mod tests {
    use super::super::validator::validate;
    use super::*;

    fn repair_once(diagram: &str, mode: Option<DiagramMode>) -> String {
        let report = validate(diagram, mode);
        repair(diagram, &report, mode)
    }

    #[test]
    fn prepends_header_when_missing() {
        let fixed = repair_once("A --> B\n", None);
        assert!(fixed.starts_with("flowchart LR\n"));
        assert!(validate(&fixed, None).is_valid());
    }

    #[test]
    fn appends_end_deficit_for_unbalanced_subgraphs() {
        let fixed = repair_once("flowchart LR\nsubgraph S\nA --> B\n", None);
        assert!(fixed.trim_end().ends_with("end"));
        assert!(validate(&fixed, None).is_valid());
    }

    #[test]
    fn surplus_end_is_left_unrepaired() {
        let diagram = "flowchart LR\nA --> B\nend\n";
        let fixed = repair_once(diagram, None);
        assert!(!validate(&fixed, None).is_valid());
    }

    #[test]
    fn joins_identifiers_with_underscores() {
        let fixed = repair_once("flowchart LR\nFE_ NAVBAR[\"Navbar\"] --> APP\n", None);
        assert!(fixed.contains("FE_NAVBAR[\"Navbar\"]"));
        assert!(validate(&fixed, None).is_valid());
    }

    #[test]
    fn quotes_parenthesized_labels() {
        let fixed = repair_once("flowchart LR\nICONS[React Icons (Io5)] --> APP\n", None);
        assert!(fixed.contains("ICONS[\"React Icons (Io5)\"]"));
        assert!(validate(&fixed, None).is_valid());
    }

    #[test]
    fn prunes_lowest_degree_nodes_to_fit_budget() {
        let mut diagram = String::from("flowchart LR\n");
        for i in 0..25 {
            diagram.push_str(&format!("N{i}[\"Node {i}\"]\n"));
        }
        diagram.push_str("N0 --> N1\nN0 --> N2\n");

        let fixed = repair_once(&diagram, Some(DiagramMode::Overview));
        let report = validate(&fixed, Some(DiagramMode::Overview));
        assert!(report.is_valid(), "{:?}", report.findings);
        // The connected nodes survive the cut.
        assert!(fixed.contains("N0 --> N1"));
    }

    #[test]
    fn repair_is_idempotent() {
        let samples = [
            "A --> B\n",
            "flowchart LR\nsubgraph S\nA --> B\n",
            "flowchart LR\nFE_ NAVBAR[\"Navbar\"] --> APP\n",
            "flowchart LR\nICONS[React Icons (Io5)] --> APP\n",
            "A[node (with parens)] --> B\nsubgraph S\nA --> B",
        ];
        for sample in samples {
            let once = repair_once(sample, Some(DiagramMode::Balanced));
            let report = validate(&once, Some(DiagramMode::Balanced));
            let twice = repair(&once, &report, Some(DiagramMode::Balanced));
            assert_eq!(once, twice, "repair not idempotent for {sample:?}");
        }
    }
}
