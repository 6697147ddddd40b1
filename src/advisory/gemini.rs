//! Google generative-language client.
//!
//! One `generateContent` call per prompt. The reply text is the
//! concatenation of the first candidate's text parts.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{AdvisoryError, TextGenerator};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-pro";

/// Configuration for the Gemini client
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    /// API key sent as `x-goog-api-key`
    pub api_key: String,
    /// Model name, e.g. `gemini-pro`
    pub model: String,
    /// API base URL
    pub base_url: String,
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), AdvisoryError> {
        if self.api_key.trim().is_empty() {
            return Err(AdvisoryError::MissingCredentials);
        }
        if self.model.is_empty() || self.base_url.is_empty() {
            return Err(AdvisoryError::Unavailable(
                "model and base URL must be set".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self, AdvisoryError> {
        config.validate()?;
        let client = Client::builder().build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }
}

/// Text of the first candidate, parts joined
fn candidate_text(data: &Value) -> Result<String, AdvisoryError> {
    let parts = data["candidates"]
        .get(0)
        .and_then(|c| c["content"]["parts"].as_array())
        .ok_or_else(|| AdvisoryError::MalformedResponse("no candidates returned".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    if text.is_empty() {
        return Err(AdvisoryError::MalformedResponse(
            "candidate has no text".to_string(),
        ));
    }
    Ok(text)
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String, AdvisoryError> {
        let body = json!({
            "contents": [{ "role": "user", "parts": [{ "text": prompt }] }]
        });

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Gemini returned {}", status);
            return Err(AdvisoryError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let data: Value = response.json().await?;
        let text = candidate_text(&data)?;
        debug!("Gemini reply: {} chars", text.len());
        Ok(text)
    }
}
