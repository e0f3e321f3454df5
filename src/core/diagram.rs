use std::sync::Arc;

use tracing::{info, warn};

use super::classify::DependencyAnalysis;
use super::content::ContentGenerator;
use super::graph::DependencyGraph;
use super::mermaid::{repair, rule_based_diagram, validate, DiagramMode};
use crate::error::CartographError;

/// A caller-provided candidate entering the loop at the repair step instead
/// of initial generation.
pub struct SeedCandidate {
    pub diagram: String,
    pub error_message: String,
}

/// What one run of the loop produced.
#[derive(Debug, Clone)]
pub struct DiagramOutcome {
    pub diagram: String,
    /// True when the loop ran out of attempts with errors remaining
    pub exhausted: bool,
    /// True when quota exhaustion was caught inside the loop
    pub quota_hit: bool,
    /// Findings still present on the returned candidate
    pub remaining_errors: Vec<String>,
}

impl DiagramOutcome {
    fn valid(diagram: String) -> Self {
        Self {
            diagram,
            exhausted: false,
            quota_hit: false,
            remaining_errors: Vec::new(),
        }
    }
}

/// Bounded self-correction loop for one diagram mode.
///
/// Generate (or accept a seed), validate, rule-repair, re-validate, and only
/// then spend an LLM repair call; at most `max_attempts - 1` repair calls
/// per diagram. Quota exhaustion never escapes the loop.
pub struct DiagramLoop {
    content: Arc<ContentGenerator>,
    max_attempts: u32,
}

impl DiagramLoop {
    pub fn new(content: Arc<ContentGenerator>, max_attempts: u32) -> Self {
        Self {
            content,
            max_attempts: max_attempts.max(1),
        }
    }

    pub async fn run(
        &self,
        mode: DiagramMode,
        analysis: &DependencyAnalysis,
        graph: &DependencyGraph,
        narrative: &str,
        folder_diagram: &str,
        seed: Option<SeedCandidate>,
    ) -> DiagramOutcome {
        let mut quota_hit = false;

        let mut candidate = match seed {
            Some(seed) => {
                info!("Correcting provided {mode} candidate: {}", seed.error_message);
                seed.diagram
            }
            None => {
                match self
                    .content
                    .generate_diagram(analysis, graph, narrative, folder_diagram, mode)
                    .await
                {
                    Ok(diagram) => diagram,
                    Err(CartographError::QuotaExhausted { .. }) => {
                        warn!("Quota exhausted generating {mode} diagram");
                        return DiagramOutcome {
                            diagram: String::new(),
                            exhausted: false,
                            quota_hit: true,
                            remaining_errors: Vec::new(),
                        };
                    }
                    Err(e) => {
                        warn!("{mode} generation failed ({e}), using rule-based diagram");
                        rule_based_diagram(analysis, mode)
                    }
                }
            }
        };

        // Best candidate so far by remaining error count.
        let mut best: Option<(String, Vec<String>)> = None;
        let mut llm_repairs = 0u32;

        loop {
            let report = validate(&candidate, Some(mode));
            if report.is_valid() {
                return DiagramOutcome::valid(candidate);
            }
            track_best(&mut best, &candidate, report.error_messages());

            candidate = repair(&candidate, &report, Some(mode));
            let after_rules = validate(&candidate, Some(mode));
            if after_rules.is_valid() {
                return DiagramOutcome::valid(candidate);
            }
            track_best(&mut best, &candidate, after_rules.error_messages());

            if llm_repairs + 1 >= self.max_attempts {
                break;
            }
            llm_repairs += 1;
            info!(
                "LLM repair {llm_repairs}/{} for {mode} diagram",
                self.max_attempts - 1
            );
            match self
                .content
                .repair_diagram(&candidate, &after_rules.error_messages())
                .await
            {
                Ok(fixed) => candidate = fixed,
                Err(CartographError::QuotaExhausted { .. }) => {
                    warn!("Quota exhausted repairing {mode} diagram, keeping best attempt");
                    quota_hit = true;
                    break;
                }
                Err(e) => {
                    warn!("LLM repair failed for {mode} diagram: {e}");
                    break;
                }
            }
        }

        let (diagram, remaining_errors) =
            best.unwrap_or_else(|| (candidate, Vec::new()));
        DiagramOutcome {
            diagram,
            exhausted: true,
            quota_hit,
            remaining_errors,
        }
    }
}

fn track_best(best: &mut Option<(String, Vec<String>)>, candidate: &str, errors: Vec<String>) {
    let better = match best {
        Some((_, current)) => errors.len() < current.len(),
        None => true,
    };
    if better {
        *best = Some((candidate.to_string(), errors));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::core::llm::{LlmGateway, ModelCallError, ModelClient};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CannedClient {
        responses: Vec<std::result::Result<String, ModelCallError>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModelClient for CannedClient {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
        ) -> std::result::Result<String, ModelCallError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(idx)
                .cloned()
                .unwrap_or(Err(ModelCallError::Quota))
        }
    }

    fn generator(responses: Vec<std::result::Result<String, ModelCallError>>) -> Arc<ContentGenerator> {
        let config = LlmConfig {
            model_fallback_order: vec!["test-model".to_string()],
            api_key: None,
            base_url: None,
            max_retries_per_model: 1,
            retry_min_delay_secs: 0.0,
            retry_max_delay_secs: 0.0,
            call_timeout_secs: 5,
        };
        let client = Arc::new(CannedClient {
            responses,
            calls: AtomicUsize::new(0),
        });
        Arc::new(ContentGenerator::new(
            Arc::new(LlmGateway::new(client, config)),
            8,
        ))
    }

    fn empty_inputs() -> (DependencyAnalysis, DependencyGraph) {
        (DependencyAnalysis::default(), DependencyGraph::default())
    }

    #[tokio::test]
    async fn valid_generation_returns_without_repair() {
        let content = generator(vec![Ok("flowchart TB\nA --> B".to_string())]);
        let (analysis, graph) = empty_inputs();
        let hammer = DiagramLoop::new(content, 3);

        let outcome = hammer
            .run(DiagramMode::Balanced, &analysis, &graph, "", "", None)
            .await;
        assert!(!outcome.exhausted);
        assert_eq!(outcome.diagram, "flowchart TB\nA --> B");
    }

    #[tokio::test]
    async fn rule_repair_avoids_spending_llm_calls() {
        // Headerless output: the rule repair fixes it without a second call.
        let content = generator(vec![Ok("A --> B".to_string())]);
        let (analysis, graph) = empty_inputs();
        let hammer = DiagramLoop::new(content, 3);

        let outcome = hammer
            .run(DiagramMode::Balanced, &analysis, &graph, "", "", None)
            .await;
        assert!(!outcome.exhausted);
        assert!(outcome.diagram.starts_with("flowchart LR"));
    }

    #[tokio::test]
    async fn seeded_correction_fixes_the_known_broken_candidate() {
        // The E2E-3 candidate: parens label, missing header, unbalanced
        // subgraph. Rules alone repair everything; no LLM calls needed.
        let content = generator(vec![]);
        let (analysis, graph) = empty_inputs();
        let hammer = DiagramLoop::new(content, 3);

        let seed = SeedCandidate {
            diagram: "A[node (with parens)] --> B\nsubgraph S\nA --> B".to_string(),
            error_message: "Parse error on line 1".to_string(),
        };
        let outcome = hammer
            .run(DiagramMode::Balanced, &analysis, &graph, "", "", Some(seed))
            .await;

        assert!(!outcome.exhausted, "{:?}", outcome.remaining_errors);
        assert!(outcome.diagram.starts_with("flowchart LR"));
        assert!(outcome.diagram.contains("A[\"node (with parens)\"]"));
        assert!(validate(&outcome.diagram, None).is_valid());
    }

    #[tokio::test]
    async fn already_valid_seed_is_returned_unchanged() {
        let content = generator(vec![]);
        let (analysis, graph) = empty_inputs();
        let hammer = DiagramLoop::new(content, 3);

        let seed = SeedCandidate {
            diagram: "flowchart TB\nA --> B".to_string(),
            error_message: "renderer said no".to_string(),
        };
        let outcome = hammer
            .run(DiagramMode::Overview, &analysis, &graph, "", "", Some(seed))
            .await;
        assert_eq!(outcome.diagram, "flowchart TB\nA --> B");
    }

    #[tokio::test]
    async fn quota_during_generation_yields_empty_diagram() {
        let content = generator(vec![Err(ModelCallError::Quota)]);
        let (analysis, graph) = empty_inputs();
        let hammer = DiagramLoop::new(content, 3);

        let outcome = hammer
            .run(DiagramMode::Detailed, &analysis, &graph, "", "", None)
            .await;
        assert!(outcome.quota_hit);
        assert!(outcome.diagram.is_empty());
    }

    #[tokio::test]
    async fn unrepairable_seed_exhausts_with_best_effort() {
        // Surplus `end` is unrepairable by rules; the LLM repairs keep
        // returning the same broken text until attempts run out.
        let broken = "flowchart LR\nA --> B\nend".to_string();
        let content = generator(vec![Ok(broken.clone()), Ok(broken.clone())]);
        let (analysis, graph) = empty_inputs();
        let hammer = DiagramLoop::new(content, 3);

        let seed = SeedCandidate {
            diagram: broken.clone(),
            error_message: "unbalanced".to_string(),
        };
        let outcome = hammer
            .run(DiagramMode::Balanced, &analysis, &graph, "", "", Some(seed))
            .await;

        assert!(outcome.exhausted);
        assert!(!outcome.remaining_errors.is_empty());
        assert_eq!(outcome.diagram, broken);
    }
}
