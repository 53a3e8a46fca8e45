use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    api_error_from_response, classify_payload, spawn_sse_reader, CompletionRequest,
    ProviderAdapter, ProviderError, ProviderEventStream, SseLine,
};
use crate::api::gemini::{
    Content, GenerateContentRequest, GenerateContentResponse, GenerationConfig, InlineData, Part,
    ThinkingConfig,
};
use crate::core::chat::{ChatConfig, ReasoningEffort};
use crate::core::delta::{ProviderEvent, ProviderResponse};
use crate::core::message::{ContentItem, Message, Role};
use crate::utils::url::construct_api_url;

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google Generative Language `generateContent` endpoints.
pub struct GeminiAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl GeminiAdapter {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
        }
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let body = build_generate_request(request);
        let endpoint = if stream {
            format!("models/{}:streamGenerateContent?alt=sse", request.config.model)
        } else {
            format!("models/{}:generateContent", request.config.model)
        };
        let url = construct_api_url(&self.base_url, &endpoint);
        debug!(model = %request.config.model, stream, url = %url, "sending Gemini request");

        let mut http_request = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            http_request = http_request.header("x-goog-api-key", &self.api_key);
        }

        let response = http_request.json(&body).send().await?;
        if !response.status().is_success() {
            return Err(api_error_from_response(response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        let call = async {
            let response = self.send(request, false).await?;
            let body: GenerateContentResponse = response.json().await?;
            Ok(ProviderResponse::Gemini(body))
        };
        tokio::select! {
            result = call => result,
            _ = cancel.cancelled() => Err(ProviderError::Cancelled),
        }
    }

    async fn stream(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderEventStream, ProviderError> {
        let response = tokio::select! {
            result = self.send(request, true) => result?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };
        Ok(spawn_sse_reader(response, cancel.clone(), decode_frame))
    }
}

fn decode_frame(payload: &str) -> SseLine {
    match classify_payload(payload) {
        Ok(value) => match serde_json::from_value::<GenerateContentResponse>(value) {
            Ok(frame) => SseLine::Item(Ok(ProviderEvent::Gemini(frame))),
            Err(err) => {
                debug!("skipping unrecognized Gemini frame: {err}");
                SseLine::Skip
            }
        },
        Err(err) => SseLine::Item(Err(err)),
    }
}

pub(crate) fn build_generate_request(request: &CompletionRequest) -> GenerateContentRequest {
    let (system_instruction, contents) = convert_messages(&request.messages);
    let config = &request.config;
    GenerateContentRequest {
        contents,
        system_instruction,
        generation_config: GenerationConfig {
            temperature: Some(config.temperature),
            top_p: Some(config.top_p),
            presence_penalty: (config.presence_penalty != 0.0).then_some(config.presence_penalty),
            frequency_penalty: (config.frequency_penalty != 0.0)
                .then_some(config.frequency_penalty),
            max_output_tokens: config.max_tokens,
            thinking_config: Some(map_thinking_config(config)),
        },
    }
}

/// System messages are joined into `systemInstruction`; everything else
/// becomes a `user` or `model` turn.
pub(crate) fn convert_messages(messages: &[Message]) -> (Option<Content>, Vec<Content>) {
    let mut system_parts = Vec::new();
    let mut contents = Vec::new();

    for message in messages {
        let parts = convert_parts(message);
        if message.role.is_system() {
            system_parts.extend(parts);
            continue;
        }
        if parts.is_empty() {
            continue;
        }
        let role = match message.role {
            Role::Assistant => "model",
            _ => "user",
        };
        contents.push(Content {
            role: Some(role.to_string()),
            parts,
        });
    }

    let system_instruction = (!system_parts.is_empty()).then(|| Content {
        role: None,
        parts: system_parts,
    });
    (system_instruction, contents)
}

fn convert_parts(message: &Message) -> Vec<Part> {
    message
        .content
        .iter()
        .filter_map(|item| match item {
            ContentItem::Text { text } if !text.is_empty() => Some(Part::text(text.clone())),
            ContentItem::Text { .. } | ContentItem::Reasoning(_) => None,
            ContentItem::Image { image_url } => Some(match parse_data_url(&image_url.url) {
                Some(inline_data) => Part {
                    inline_data: Some(inline_data),
                    ..Default::default()
                },
                None => Part::text(format!("[Image: {}]", image_url.url)),
            }),
        })
        .collect()
}

/// Splits `data:<mime>;base64,<payload>` into inline data.
fn parse_data_url(url: &str) -> Option<InlineData> {
    let rest = url.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;
    Some(InlineData {
        mime_type: mime_type.to_string(),
        data: data.to_string(),
    })
}

/// 2.x models take a token budget; newer models take a named level.
pub fn map_thinking_config(config: &ChatConfig) -> ThinkingConfig {
    let model = config.model.to_ascii_lowercase();
    if model.contains("2.5") || model.contains("2.0") {
        let budget = match config.reasoning_effort {
            ReasoningEffort::Minimal => 0,
            ReasoningEffort::Low => 1024,
            ReasoningEffort::Medium => 8192,
            ReasoningEffort::High => -1,
        };
        ThinkingConfig {
            include_thoughts: true,
            thinking_budget: Some(budget),
            thinking_level: None,
        }
    } else {
        ThinkingConfig {
            include_thoughts: true,
            thinking_budget: None,
            thinking_level: Some(config.reasoning_effort.as_str().to_string()),
        }
    }
}
