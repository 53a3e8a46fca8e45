//! Provider payloads mapped onto the canonical `{content, reasoning}` delta.

use crate::api::gemini::GenerateContentResponse;
use crate::api::{ChatCompletion, ChatCompletionChunk};

/// One streamed event, tagged by the provider family that produced it.
#[derive(Debug, Clone)]
pub enum ProviderEvent {
    OpenAi(ChatCompletionChunk),
    Gemini(GenerateContentResponse),
}

/// A complete non-streamed response.
#[derive(Debug, Clone)]
pub enum ProviderResponse {
    OpenAi(ChatCompletion),
    Gemini(GenerateContentResponse),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamDelta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
}

impl StreamDelta {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            reasoning: None,
        }
    }

    pub fn reasoning(reasoning: impl Into<String>) -> Self {
        Self {
            content: None,
            reasoning: Some(reasoning.into()),
        }
    }

    /// Empty strings become `None`.
    pub fn from_parts(content: String, reasoning: String) -> Self {
        Self {
            content: (!content.is_empty()).then_some(content),
            reasoning: (!reasoning.is_empty()).then_some(reasoning),
        }
    }

    pub fn content_str(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    pub fn reasoning_str(&self) -> &str {
        self.reasoning.as_deref().unwrap_or_default()
    }

    pub fn has_content(&self) -> bool {
        !self.content_str().is_empty()
    }

    pub fn has_reasoning(&self) -> bool {
        !self.reasoning_str().is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_content() && !self.has_reasoning()
    }
}

/// Maps one streamed event. Frames without a delta payload (usage
/// statistics, empty `choices`, no candidates) yield the empty delta.
pub fn normalize_event(event: &ProviderEvent) -> StreamDelta {
    match event {
        ProviderEvent::OpenAi(chunk) => {
            let Some(delta) = chunk.choices.first().and_then(|choice| choice.delta.as_ref()) else {
                return StreamDelta::default();
            };
            let reasoning = delta
                .reasoning_content
                .clone()
                .or_else(|| delta.reasoning.clone());
            StreamDelta::from_parts(
                delta.content.clone().unwrap_or_default(),
                reasoning.unwrap_or_default(),
            )
        }
        ProviderEvent::Gemini(response) => split_gemini_parts(response),
    }
}

/// Maps a whole non-streamed response to a single delta.
pub fn normalize_response(response: &ProviderResponse) -> StreamDelta {
    match response {
        ProviderResponse::OpenAi(completion) => {
            let Some(message) = completion
                .choices
                .first()
                .and_then(|choice| choice.message.as_ref())
            else {
                return StreamDelta::default();
            };
            let reasoning = message
                .reasoning_content
                .clone()
                .or_else(|| message.reasoning.clone());
            StreamDelta::from_parts(
                message.content.clone().unwrap_or_default(),
                reasoning.unwrap_or_default(),
            )
        }
        ProviderResponse::Gemini(response) => split_gemini_parts(response),
    }
}

fn split_gemini_parts(response: &GenerateContentResponse) -> StreamDelta {
    let mut content = String::new();
    let mut reasoning = String::new();
    for part in response.first_parts() {
        let Some(text) = part.text.as_deref() else {
            continue;
        };
        if part.is_thought() {
            reasoning.push_str(text);
        } else {
            content.push_str(text);
        }
    }
    StreamDelta::from_parts(content, reasoning)
}
