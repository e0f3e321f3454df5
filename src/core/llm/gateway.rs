use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde::de::DeserializeOwned;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::response::{clean_markdown, extract_json_object, extract_mermaid};
use crate::config::LlmConfig;
use crate::error::{CartographError, Result};

/// Error kinds a model provider can report for a single call.
#[derive(Debug, Clone)]
pub enum ModelCallError {
    /// Quota exhausted for this model; move on without waiting
    Quota,
    /// Worth retrying the same model after a delay
    Transient(String),
    /// Retrying cannot help (bad request, auth)
    Fatal(String),
}

impl std::fmt::Display for ModelCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelCallError::Quota => write!(f, "quota exhausted"),
            ModelCallError::Transient(msg) => write!(f, "transient failure: {msg}"),
            ModelCallError::Fatal(msg) => write!(f, "fatal failure: {msg}"),
        }
    }
}

/// The one seam to any model provider. Tests substitute fakes.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn generate(&self, model: &str, prompt: &str)
        -> std::result::Result<String, ModelCallError>;
}

/// Single call surface for all LLM work: an ordered model fallback chain
/// with per-model bounded retry, per-call deadlines, and response-shape
/// validation for structured output.
pub struct LlmGateway {
    client: Arc<dyn ModelClient>,
    config: LlmConfig,
}

impl LlmGateway {
    pub fn new(client: Arc<dyn ModelClient>, config: LlmConfig) -> Self {
        Self { client, config }
    }

    /// Generate prose/markdown. Fences are stripped from the response.
    pub async fn generate_markdown(&self, system: &str, user: &str) -> Result<String> {
        let prompt = format!("{system}\n\n{user}");
        let response = self.call_with_fallback(&prompt).await?;
        Ok(clean_markdown(&response))
    }

    /// Generate a structured response validated against `T`.
    ///
    /// On a shape mismatch the gateway issues one corrective retry with a
    /// shape-repair prompt; a second mismatch surfaces as [`CartographError::Shape`].
    pub async fn generate_structured<T: DeserializeOwned>(
        &self,
        system: &str,
        user: &str,
    ) -> Result<T> {
        let prompt = format!("{system}\n\n{user}");
        let response = self.call_with_fallback(&prompt).await?;

        match parse_structured::<T>(&response) {
            Ok(value) => Ok(value),
            Err(first_error) => {
                warn!("Structured response invalid ({first_error}), retrying with shape-repair prompt");
                let fix_prompt = format!("{}\n\n{user}", super::prompts::shape_repair_prefix(system));
                let second = self.call_with_fallback(&fix_prompt).await?;
                parse_structured::<T>(&second).map_err(CartographError::Shape)
            }
        }
    }

    /// Generate a Mermaid flowchart; fenced blocks are unwrapped.
    pub async fn generate_mermaid(&self, system: &str, user: &str) -> Result<String> {
        let prompt = format!("{system}\n\n{user}");
        let response = self.call_with_fallback(&prompt).await?;
        Ok(extract_mermaid(&response))
    }

    /// Walk the model fallback chain with bounded retry per model.
    ///
    /// Transient failures (including deadline expiry) wait a uniform delay
    /// and retry the same model; quota failures advance to the next model
    /// immediately; fatal failures surface as [`CartographError::Api`].
    /// `QuotaExhausted` is reported only when every attempted model's
    /// attempts ended against quota; a chain that also ran out of transient
    /// retries somewhere is an `Api` failure.
    async fn call_with_fallback(&self, prompt: &str) -> Result<String> {
        let mut attempted = Vec::new();
        let mut every_model_hit_quota = true;
        let deadline = Duration::from_secs(self.config.call_timeout_secs);

        for model in &self.config.model_fallback_order {
            attempted.push(model.clone());
            debug!("Trying model {model}");

            let mut exited_on_quota = false;
            for attempt in 0..self.config.max_retries_per_model {
                if attempt > 0 {
                    info!("Retry {}/{} for {model}", attempt + 1, self.config.max_retries_per_model);
                    self.random_delay().await;
                }

                let outcome = match timeout(deadline, self.client.generate(model, prompt)).await {
                    Ok(result) => result,
                    Err(_) => Err(ModelCallError::Transient(format!(
                        "call exceeded {}s deadline",
                        deadline.as_secs()
                    ))),
                };

                match outcome {
                    Ok(text) => return Ok(text),
                    Err(ModelCallError::Quota) => {
                        warn!("Model {model} quota exhausted, moving to next model");
                        exited_on_quota = true;
                        break;
                    }
                    Err(ModelCallError::Transient(msg)) => {
                        warn!("Model {model} transient failure (attempt {}): {msg}", attempt + 1);
                    }
                    Err(ModelCallError::Fatal(msg)) => {
                        return Err(CartographError::Api(msg));
                    }
                }
            }
            if !exited_on_quota {
                every_model_hit_quota = false;
            }
        }

        if every_model_hit_quota && !attempted.is_empty() {
            Err(CartographError::QuotaExhausted {
                attempted_models: attempted,
            })
        } else {
            Err(CartographError::Api(format!(
                "all models exhausted their attempts without success (attempted: {})",
                attempted.join(", ")
            )))
        }
    }

    async fn random_delay(&self) {
        let delay = rand::thread_rng()
            .gen_range(self.config.retry_min_delay_secs..=self.config.retry_max_delay_secs);
        debug!("Waiting {delay:.1}s before retry");
        tokio::time::sleep(Duration::from_secs_f64(delay)).await;
    }
}

fn parse_structured<T: DeserializeOwned>(response: &str) -> std::result::Result<T, String> {
    let value = extract_json_object(response).ok_or_else(|| "no JSON object found".to_string())?;
    serde_json::from_value(value).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted client: one canned outcome per (model, call) in order.
    struct ScriptedClient {
        script: Vec<std::result::Result<String, ModelCallError>>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(script: Vec<std::result::Result<String, ModelCallError>>) -> Self {
            Self {
                script,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ModelClient for ScriptedClient {
        async fn generate(
            &self,
            _model: &str,
            _prompt: &str,
        ) -> std::result::Result<String, ModelCallError> {
            let idx = self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .get(idx)
                .cloned()
                .unwrap_or(Err(ModelCallError::Quota))
        }
    }

    fn fast_config(models: usize) -> LlmConfig {
        LlmConfig {
            model_fallback_order: (0..models).map(|i| format!("model-{i}")).collect(),
            api_key: None,
            base_url: None,
            max_retries_per_model: 2,
            retry_min_delay_secs: 0.0,
            retry_max_delay_secs: 0.0,
            call_timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn quota_advances_to_the_next_model() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(ModelCallError::Quota),
            Ok("second model answered".to_string()),
        ]));
        let gateway = LlmGateway::new(client.clone(), fast_config(2));

        let text = gateway.generate_markdown("sys", "user").await.unwrap();
        assert_eq!(text, "second model answered");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transient_retries_the_same_model() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(ModelCallError::Transient("503".to_string())),
            Ok("recovered".to_string()),
        ]));
        let gateway = LlmGateway::new(client.clone(), fast_config(2));

        let text = gateway.generate_markdown("sys", "user").await.unwrap();
        assert_eq!(text, "recovered");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn quota_everywhere_surfaces_quota_exhausted() {
        let client = Arc::new(ScriptedClient::new(vec![
            Err(ModelCallError::Quota),
            Err(ModelCallError::Quota),
            Err(ModelCallError::Quota),
        ]));
        let gateway = LlmGateway::new(client, fast_config(3));

        let err = gateway.generate_markdown("sys", "user").await.unwrap_err();
        match err {
            CartographError::QuotaExhausted { attempted_models } => {
                assert_eq!(attempted_models.len(), 3);
            }
            other => panic!("expected QuotaExhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn mixed_exhaustion_is_an_api_error_not_quota() {
        // model-0 burns both attempts on transient failures and never sees
        // quota; model-1 hits quota immediately. Not every model exhausted
        // against quota, so this is not QuotaExhausted.
        let client = Arc::new(ScriptedClient::new(vec![
            Err(ModelCallError::Transient("503".to_string())),
            Err(ModelCallError::Transient("503".to_string())),
            Err(ModelCallError::Quota),
        ]));
        let gateway = LlmGateway::new(client.clone(), fast_config(2));

        let err = gateway.generate_markdown("sys", "user").await.unwrap_err();
        assert!(matches!(err, CartographError::Api(_)), "got {err:?}");
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_errors_stop_the_chain_immediately() {
        let client = Arc::new(ScriptedClient::new(vec![Err(ModelCallError::Fatal(
            "invalid api key".to_string(),
        ))]));
        let gateway = LlmGateway::new(client.clone(), fast_config(3));

        let err = gateway.generate_markdown("sys", "user").await.unwrap_err();
        assert!(matches!(err, CartographError::Api(_)));
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[derive(Debug, serde::Deserialize)]
    struct Shape {
        name: String,
    }

    #[tokio::test]
    async fn shape_mismatch_gets_one_corrective_retry() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok("not json at all".to_string()),
            Ok("{\"name\": \"fixed\"}".to_string()),
        ]));
        let gateway = LlmGateway::new(client.clone(), fast_config(1));

        let shape: Shape = gateway.generate_structured("sys", "user").await.unwrap();
        assert_eq!(shape.name, "fixed");
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn second_shape_mismatch_is_a_shape_error() {
        let client = Arc::new(ScriptedClient::new(vec![
            Ok("still not json".to_string()),
            Ok("also not json".to_string()),
        ]));
        let gateway = LlmGateway::new(client, fast_config(1));

        let err = gateway
            .generate_structured::<Shape>("sys", "user")
            .await
            .unwrap_err();
        assert!(matches!(err, CartographError::Shape(_)));
    }
}
