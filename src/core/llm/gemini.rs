use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::json;

use super::gateway::{ModelCallError, ModelClient};
use crate::config::LlmConfig;
use crate::error::{CartographError, Result};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// HTTP client for the Gemini generateContent API.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| CartographError::Config("GEMINI_API_KEY not set".to_string()))?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl ModelClient for GeminiClient {
    async fn generate(
        &self,
        model: &str,
        prompt: &str,
    ) -> std::result::Result<String, ModelCallError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            model
        );
        let payload = json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ModelCallError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ModelCallError::Transient(format!("unreadable response body: {e}")))?;

        data["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ModelCallError::Transient("response carried no candidate text".to_string())
            })
    }
}

/// Map provider status codes onto the gateway's error taxonomy: 429 is
/// quota, auth and malformed requests are fatal, everything else is worth a
/// retry.
fn classify_status(status: StatusCode, body: &str) -> ModelCallError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ModelCallError::Quota,
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ModelCallError::Fatal(format!("API error {status}: {}", truncate(body)))
        }
        _ => ModelCallError::Transient(format!("API error {status}: {}", truncate(body))),
    }
}

fn truncate(body: &str) -> String {
    body.chars().take(300).collect()
}
