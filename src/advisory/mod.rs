//! Advisory module for generative-language enrichment.
//!
//! This module handles:
//! - Journal insight extraction from free-text model output
//! - Support and panic-mode chat replies (see [`chat`])
//!
//! Every call here is best effort. Operations return `Result` and callers
//! choose the fallback explicitly; nothing in this module is required for a
//! record to be saved.

pub mod chat;
mod gemini;

pub use chat::{ChatMessage, ChatMode, ChatReply};
pub use gemini::{GeminiClient, GeminiConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while asking the model for advice
#[derive(Error, Debug)]
pub enum AdvisoryError {
    #[error("Advisory unavailable: {0}")]
    Unavailable(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Model service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed model response: {0}")]
    MalformedResponse(String),

    #[error("Missing API credentials")]
    MissingCredentials,
}

/// A single-shot text generation service
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AdvisoryError>;
}

/// Structured reading of a journal entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    #[serde(default = "neutral")]
    pub sentiment: String,
    #[serde(default)]
    pub emotions: Vec<String>,
    #[serde(default)]
    pub triggers: Vec<String>,
    #[serde(default)]
    pub positives: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

fn neutral() -> String {
    "neutral".to_string()
}

impl Insight {
    /// Neutral insight used whenever enrichment is skipped or fails
    pub fn placeholder() -> Self {
        Self {
            sentiment: neutral(),
            emotions: vec!["reflection".to_string()],
            triggers: Vec::new(),
            positives: vec!["self-awareness".to_string()],
            suggestions: vec!["Keep journaling to track your mental health journey.".to_string()],
        }
    }
}

/// Generative-language advisor. Without a generator every call reports
/// [`AdvisoryError::Unavailable`].
#[derive(Clone, Default)]
pub struct Advisor {
    generator: Option<Arc<dyn TextGenerator>>,
}

impl Advisor {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator: Some(generator),
        }
    }

    pub fn disabled() -> Self {
        Self { generator: None }
    }

    pub fn is_available(&self) -> bool {
        self.generator.is_some()
    }

    pub(crate) async fn generate(&self, prompt: &str) -> Result<String, AdvisoryError> {
        let generator = self
            .generator
            .as_ref()
            .ok_or_else(|| AdvisoryError::Unavailable("no model configured".to_string()))?;
        generator.generate(prompt).await
    }

    /// Ask the model for an [`Insight`] on a journal entry
    pub async fn analyze_journal(&self, content: &str) -> Result<Insight, AdvisoryError> {
        let text = self.generate(&journal_prompt(content)).await?;
        let object = extract_json_object(&text).ok_or_else(|| {
            AdvisoryError::MalformedResponse("no JSON object in response".to_string())
        })?;
        let insight = serde_json::from_value(object)
            .map_err(|e| AdvisoryError::MalformedResponse(e.to_string()))?;
        debug!("Journal insight extracted");
        Ok(insight)
    }
}

fn journal_prompt(content: &str) -> String {
    format!(
        r#"Analyze this journal entry for mental health insights. Extract:
1. Overall sentiment (positive, negative, neutral)
2. Key emotions mentioned
3. Potential triggers or stressors
4. Positive aspects or coping mechanisms
5. Suggestions for improvement or reflection

Journal entry: "{}"

Return the analysis in JSON format with keys: sentiment, emotions, triggers, positives, suggestions"#,
        content
    )
}

/// First parseable JSON object embedded in free text
pub fn extract_json_object(text: &str) -> Option<Value> {
    for (start, _) in text.match_indices('{') {
        let mut values = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        if let Some(Ok(value @ Value::Object(_))) = values.next() {
            return Some(value);
        }
    }
    None
}
