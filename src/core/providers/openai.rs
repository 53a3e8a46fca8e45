use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    api_error_from_response, classify_payload, spawn_sse_reader, CompletionRequest,
    ProviderAdapter, ProviderError, ProviderEventStream, SseLine,
};
use crate::api::{ChatCompletion, ChatCompletionChunk, ChatMessage, ChatRequest};
use crate::core::chat::{ChatConfig, ReasoningEffort};
use crate::core::delta::{ProviderEvent, ProviderResponse};
use crate::utils::url::construct_api_url;

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// OpenAI-compatible `chat/completions` endpoint.
pub struct OpenAiAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiAdapter {
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
        let body = build_chat_request(request, stream);
        let url = construct_api_url(&self.base_url, "chat/completions");
        debug!(model = %body.model, stream, url = %url, "sending chat completion request");

        let mut http_request = self
            .client
            .post(url)
            .header("Content-Type", "application/json");
        if !self.api_key.is_empty() {
            http_request = http_request.bearer_auth(&self.api_key);
        }

        let response = http_request.json(&body).send().await?;
        if !response.status().is_success() {
            return Err(api_error_from_response(response).await);
        }
        Ok(response)
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError> {
        let call = async {
            let response = self.send(request, false).await?;
            let completion: ChatCompletion = response.json().await?;
            Ok(ProviderResponse::OpenAi(completion))
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
        Ok(spawn_sse_reader(response, cancel.clone(), decode_chunk))
    }
}

fn decode_chunk(payload: &str) -> SseLine {
    if payload == "[DONE]" {
        return SseLine::Done;
    }
    match classify_payload(payload) {
        Ok(value) => match serde_json::from_value::<ChatCompletionChunk>(value) {
            Ok(chunk) => SseLine::Item(Ok(ProviderEvent::OpenAi(chunk))),
            Err(err) => {
                debug!("skipping unrecognized stream frame: {err}");
                SseLine::Skip
            }
        },
        Err(err) => SseLine::Item(Err(err)),
    }
}

pub(crate) fn build_chat_request(request: &CompletionRequest, stream: bool) -> ChatRequest {
    let config = &request.config;
    ChatRequest {
        model: config.model.clone(),
        messages: request.messages.iter().map(ChatMessage::from_message).collect(),
        stream,
        temperature: Some(config.temperature),
        top_p: Some(config.top_p),
        presence_penalty: non_zero(config.presence_penalty),
        frequency_penalty: non_zero(config.frequency_penalty),
        max_tokens: config.max_tokens,
        reasoning_effort: openai_reasoning_effort(config).map(str::to_string),
    }
}

fn non_zero(value: f32) -> Option<f32> {
    (value != 0.0).then_some(value)
}

/// `reasoning_effort` is only accepted by o-series models, and OpenAI has no
/// `minimal` level.
pub fn openai_reasoning_effort(config: &ChatConfig) -> Option<&'static str> {
    let model = config.model.to_ascii_lowercase();
    let mut chars = model.chars();
    let o_series = chars.next() == Some('o') && chars.next().is_some_and(|c| c.is_ascii_digit());
    let o_variant = ["-o1", "-o3", "-o4"].iter().any(|tag| model.contains(tag));
    if !o_series && !o_variant {
        return None;
    }
    Some(match config.reasoning_effort {
        ReasoningEffort::Minimal | ReasoningEffort::Low => "low",
        ReasoningEffort::Medium => "medium",
        ReasoningEffort::High => "high",
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Message;

    fn config(model: &str, effort: ReasoningEffort) -> ChatConfig {
        ChatConfig {
            reasoning_effort: effort,
            ..ChatConfig::for_model(model)
        }
    }

    #[test]
    fn reasoning_effort_only_for_o_series() {
        assert_eq!(openai_reasoning_effort(&config("gpt-4o", ReasoningEffort::High)), None);
        assert_eq!(openai_reasoning_effort(&config("o3-mini", ReasoningEffort::Medium)), Some("medium"));
        assert_eq!(openai_reasoning_effort(&config("O1", ReasoningEffort::Minimal)), Some("low"));
        assert_eq!(
            openai_reasoning_effort(&config("azure-o4-mini", ReasoningEffort::High)),
            Some("high")
        );
        assert_eq!(openai_reasoning_effort(&config("omni", ReasoningEffort::High)), None);
    }

    #[test]
    fn request_omits_zero_penalties() {
        let mut chat_config = config("gpt-4o", ReasoningEffort::High);
        chat_config.frequency_penalty = 0.5;
        let request = CompletionRequest {
            config: chat_config,
            messages: vec![Message::user("hi")],
        };
        let body = serde_json::to_value(build_chat_request(&request, true)).expect("json");
        assert_eq!(body["stream"], true);
        assert_eq!(body["frequency_penalty"], 0.5);
        assert!(body.get("presence_penalty").is_none());
        assert!(body.get("reasoning_effort").is_none());
        assert_eq!(body["messages"][0]["content"], "hi");
    }

    #[test]
    fn stream_frames_decode() {
        match decode_chunk(r#"{"choices":[{"delta":{"content":"Hello"}}]}"#) {
            SseLine::Item(Ok(ProviderEvent::OpenAi(chunk))) => {
                let delta = chunk.choices[0].delta.as_ref().expect("delta");
                assert_eq!(delta.content.as_deref(), Some("Hello"));
            }
            other => panic!("expected chunk, got {other:?}"),
        }
        assert!(matches!(decode_chunk("[DONE]"), SseLine::Done));
        assert!(matches!(decode_chunk(r#"{"choices":"oops"}"#), SseLine::Skip));
        assert!(matches!(
            decode_chunk("upstream timed out"),
            SseLine::Item(Err(ProviderError::Api { .. }))
        ));
    }
}
