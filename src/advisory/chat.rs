//! Support and panic-mode chat replies.
//!
//! Chat is stateless: the caller sends the conversation so far and gets one
//! reply. When the model is unreachable the reply is a fixed, mode-specific
//! message and `fallback` is set.

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::Advisor;

/// Number of prior messages included in the support prompt
const SUPPORT_CONTEXT_MESSAGES: usize = 5;

const SUPPORT_FALLBACK: &str = "I'm sorry, I'm having trouble connecting right now. Please try again in a moment, or feel free to explore the app's other features.";

const PANIC_FALLBACK: &str = "I'm here for you. Let's try a simple breathing exercise: Breathe in for 4 counts, hold for 4, exhale for 4. Would you like me to suggest some grounding techniques?";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: Sender,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// General emotional support and motivation
    Support,
    /// Crisis support: grounding first, then breathing, then affirmations
    Panic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: ChatMessage,
    /// True when the model was unavailable and a canned reply was used
    pub fallback: bool,
}

impl ChatMode {
    fn prompt(&self, history: &[ChatMessage], message: &str) -> String {
        match self {
            ChatMode::Support => {
                let skip = history.len().saturating_sub(SUPPORT_CONTEXT_MESSAGES);
                let context = history[skip..]
                    .iter()
                    .map(|m| format!("{}: {}", m.sender.as_str(), m.text))
                    .collect::<Vec<_>>()
                    .join("\n");
                format!(
                    "You are a supportive, empathetic AI assistant for Mind Cycle, a mental health and productivity app. Your role is to:
- Provide emotional support and encouragement
- Help with goal setting and motivation
- Offer advice on mental health and wellness
- Be conversational and human-like
- Listen actively and respond thoughtfully
- Suggest app features when relevant
- Maintain a positive, supportive tone
- Be honest about limitations (you're not a licensed therapist)

Previous conversation context: {}

User message: {}",
                    context, message
                )
            }
            ChatMode::Panic => format!(
                "You are an empathetic mental-health support companion in a panic mode chat. Never judge the user. Always validate feelings. Offer grounding techniques first, then breathing exercises, then positive affirmations.

SYSTEM RULES:
- Prioritize: Grounding techniques, then breathing exercises, then positive affirmations, then short distraction suggestions
- Be calm, compassionate, and non-judgmental
- Keep responses concise but supportive
- Always acknowledge their feelings first
- Never give medical advice or diagnosis
- If they mention self-harm, suggest immediate professional help

User message: \"{}\"

Respond empathetically and offer appropriate support techniques.",
                message
            ),
        }
    }

    fn fallback(&self) -> &'static str {
        match self {
            ChatMode::Support => SUPPORT_FALLBACK,
            ChatMode::Panic => PANIC_FALLBACK,
        }
    }
}

impl Advisor {
    /// One chat reply. Returns `None` for a blank message.
    pub async fn chat_reply(
        &self,
        mode: ChatMode,
        history: &[ChatMessage],
        message: &str,
    ) -> Option<ChatReply> {
        let message = message.trim();
        if message.is_empty() {
            return None;
        }

        let (text, fallback) = match self.generate(&mode.prompt(history, message)).await {
            Ok(text) => (text, false),
            Err(e) => {
                warn!("Chat reply unavailable ({:?}): {}", mode, e);
                (mode.fallback().to_string(), true)
            }
        };

        Some(ChatReply {
            message: ChatMessage {
                sender: Sender::Bot,
                text,
            },
            fallback,
        })
    }
}
