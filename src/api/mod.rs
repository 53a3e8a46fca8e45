//! OpenAI-compatible chat completion payloads.

use serde::{Deserialize, Serialize};

use crate::core::message::{ContentItem, ImageUrl, Message};

pub mod gemini;

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(untagged)]
pub enum ChatMessageContent {
    Text(String),
    Parts(Vec<ChatContentPart>),
}

#[derive(Serialize, Clone, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: ChatMessageContent,
}

impl ChatMessage {
    /// Wire form of a transcript message. Reasoning blocks are dropped; a
    /// message holding a single text block is sent as a plain string.
    pub fn from_message(message: &Message) -> Self {
        let parts: Vec<ChatContentPart> = message
            .content
            .iter()
            .filter_map(|item| match item {
                ContentItem::Text { text } => Some(ChatContentPart::Text { text: text.clone() }),
                ContentItem::Image { image_url } => Some(ChatContentPart::ImageUrl {
                    image_url: image_url.clone(),
                }),
                ContentItem::Reasoning(_) => None,
            })
            .collect();

        let content = match parts.as_slice() {
            [ChatContentPart::Text { text }] => ChatMessageContent::Text(text.clone()),
            _ => ChatMessageContent::Parts(parts),
        };

        Self {
            role: message.role.as_str().to_string(),
            content,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
}

/// Streamed delta. Gateways differ on the reasoning field name.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ChatResponseDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ChatResponseChoice {
    #[serde(default)]
    pub delta: Option<ChatResponseDelta>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// One `data:` frame of a streamed completion. Usage-only frames carry an
/// empty (or missing) `choices` list.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub choices: Vec<ChatResponseChoice>,
    #[serde(default)]
    pub usage: Option<serde_json::Value>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CompletionMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct CompletionChoice {
    #[serde(default)]
    pub message: Option<CompletionMessage>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ChatCompletion {
    #[serde(default)]
    pub choices: Vec<CompletionChoice>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_text_block_serializes_as_string() {
        let mut message = Message::assistant("hello");
        message.reasoning_or_insert().text.push_str("hidden");
        let wire = serde_json::to_value(ChatMessage::from_message(&message)).expect("json");
        assert_eq!(wire, serde_json::json!({"role": "assistant", "content": "hello"}));
    }

    #[test]
    fn mixed_content_serializes_as_parts() {
        let message = Message::new(
            crate::core::message::Role::User,
            vec![ContentItem::text("look"), ContentItem::image("https://x/y.png")],
        );
        let wire = serde_json::to_value(ChatMessage::from_message(&message)).expect("json");
        assert_eq!(
            wire["content"],
            serde_json::json!([
                {"type": "text", "text": "look"},
                {"type": "image_url", "image_url": {"url": "https://x/y.png"}}
            ])
        );
    }

    #[test]
    fn usage_only_chunk_deserializes() {
        let chunk: ChatCompletionChunk =
            serde_json::from_str(r#"{"choices":[],"usage":{"total_tokens":5}}"#).expect("chunk");
        assert!(chunk.choices.is_empty());
        assert!(chunk.usage.is_some());
    }
}
