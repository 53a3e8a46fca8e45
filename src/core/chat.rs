use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::message::Message;

/// Stable chat identity, fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(String);

impl ChatId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random 128-bit id rendered as hex.
    pub fn generate() -> Result<Self, getrandom::Error> {
        let mut bytes = [0u8; 16];
        getrandom::fill(&mut bytes)?;
        Ok(Self(bytes.iter().map(|b| format!("{b:02x}")).collect()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChatId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Minimal,
    Low,
    Medium,
    #[default]
    High,
}

impl ReasoningEffort {
    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Minimal => "minimal",
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default)]
    pub presence_penalty: f32,
    #[serde(default)]
    pub frequency_penalty: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub reasoning_effort: ReasoningEffort,
}

fn default_temperature() -> f32 {
    1.0
}

fn default_top_p() -> f32 {
    1.0
}

impl ChatConfig {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            max_tokens: None,
            reasoning_effort: ReasoningEffort::default(),
        }
    }
}

/// One conversation. Messages are shared so a snapshot costs one refcount per
/// message and a write copies only the message it touches.
#[derive(Debug, Clone)]
pub struct Chat {
    pub id: ChatId,
    pub title: String,
    pub title_set: bool,
    pub config: ChatConfig,
    pub messages: Vec<Arc<Message>>,
}

impl Chat {
    pub fn new(id: ChatId, config: ChatConfig) -> Self {
        Self {
            id,
            title: String::new(),
            title_set: false,
            config,
            messages: Vec::new(),
        }
    }

    pub fn with_messages(mut self, messages: impl IntoIterator<Item = Message>) -> Self {
        self.messages = messages.into_iter().map(Arc::new).collect();
        self
    }

    /// Messages as sent to a provider: reasoning stripped.
    pub fn outgoing_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .map(|message| message.without_reasoning())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_hex_and_distinct() {
        let a = ChatId::generate().expect("id");
        let b = ChatId::generate().expect("id");
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn chat_config_defaults_fill_missing_fields() {
        let config: ChatConfig = serde_json::from_str(r#"{"model":"gpt-4o"}"#).expect("config");
        assert_eq!(config, ChatConfig::for_model("gpt-4o"));
        assert_eq!(config.reasoning_effort, ReasoningEffort::High);
    }
}
