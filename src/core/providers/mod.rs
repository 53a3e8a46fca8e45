//! Provider adapters: the thin layer that turns a chat into provider-native
//! requests and hands back events the delta normalizer understands.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use memchr::memchr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::chat::ChatConfig;
use crate::core::config::{ProviderConfig, ProviderKind};
use crate::core::delta::{ProviderEvent, ProviderResponse};
use crate::core::message::Message;

pub mod gemini;
pub mod openai;

pub use gemini::GeminiAdapter;
pub use openai::OpenAiAdapter;

/// What an adapter needs to issue one call. Messages are already stripped of
/// reasoning blocks.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub config: ChatConfig,
    pub messages: Vec<Message>,
}

impl CompletionRequest {
    pub fn new(config: ChatConfig, messages: &[impl AsRef<Message>]) -> Self {
        Self {
            config,
            messages: messages
                .iter()
                .map(|message| message.as_ref().without_reasoning())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The request never produced a response (connect, TLS, body read).
    Transport(String),
    /// The provider answered with an error status or an error payload.
    Api {
        status: Option<u16>,
        message: String,
    },
    /// The response body could not be decoded.
    Decode(String),
    /// The caller's cancellation token fired.
    Cancelled,
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Transport(msg) => write!(f, "Request failed: {msg}"),
            ProviderError::Api {
                status: Some(status),
                message,
            } => write!(f, "HTTP {status}: {message}"),
            ProviderError::Api {
                status: None,
                message,
            } => write!(f, "{message}"),
            ProviderError::Decode(msg) => write!(f, "Invalid response: {msg}"),
            ProviderError::Cancelled => write!(f, "Request cancelled"),
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Decode(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

pub type ProviderEventStream =
    Pin<Box<dyn Stream<Item = Result<ProviderEvent, ProviderError>> + Send>>;

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// One-shot call returning the whole answer.
    async fn complete(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, ProviderError>;

    /// Streaming call. Resolves once the provider has accepted the request and
    /// a readable stream exists.
    async fn stream(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderEventStream, ProviderError>;
}

/// Builds the adapter for a configured provider. The API key is read from the
/// provider's environment variable, if any.
pub fn build_adapter(provider: &ProviderConfig, client: reqwest::Client) -> Box<dyn ProviderAdapter> {
    let api_key = provider
        .api_key_env
        .as_deref()
        .and_then(|var| std::env::var(var).ok())
        .unwrap_or_default();
    let base_url = provider.resolved_base_url();
    match provider.kind {
        ProviderKind::OpenAi => Box::new(OpenAiAdapter::new(client, base_url, api_key)),
        ProviderKind::Gemini => Box::new(GeminiAdapter::new(client, base_url, api_key)),
    }
}

/// How one SSE line should be handled.
#[derive(Debug)]
pub(crate) enum SseLine {
    Skip,
    Done,
    Item(Result<ProviderEvent, ProviderError>),
}

pub(crate) fn extract_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}

pub(crate) fn process_sse_line(line: &str, decode: fn(&str) -> SseLine) -> SseLine {
    match extract_data_payload(line) {
        Some(payload) if !payload.trim().is_empty() => decode(payload),
        _ => SseLine::Skip,
    }
}

/// Splits a JSON `data:` payload into an error body or a value to decode.
/// Payloads that are not JSON at all are reported as API errors.
pub(crate) fn classify_payload(payload: &str) -> Result<serde_json::Value, ProviderError> {
    match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(value) if value.get("error").is_some() => Err(ProviderError::Api {
            status: None,
            message: format_api_error(payload),
        }),
        Ok(value) => Ok(value),
        Err(_) => Err(ProviderError::Api {
            status: None,
            message: format_api_error(payload),
        }),
    }
}

/// Spawns a reader that splits the body into SSE lines and decodes each
/// `data:` payload. The returned stream ends after `[DONE]`, after the first
/// error, when the body ends, or when `cancel` fires.
pub(crate) fn spawn_sse_reader(
    response: reqwest::Response,
    cancel: CancellationToken,
    decode: fn(&str) -> SseLine,
) -> ProviderEventStream {
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        tokio::select! {
            _ = read_sse_body(response, decode, &tx) => {}
            _ = cancel.cancelled() => {
                debug!("SSE reader cancelled");
            }
        }
    });
    Box::pin(futures_util::stream::poll_fn(move |cx| rx.poll_recv(cx)))
}

async fn read_sse_body(
    response: reqwest::Response,
    decode: fn(&str) -> SseLine,
    tx: &mpsc::UnboundedSender<Result<ProviderEvent, ProviderError>>,
) {
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk_bytes = match chunk {
            Ok(bytes) => bytes,
            Err(err) => {
                let _ = tx.send(Err(ProviderError::Transport(err.to_string())));
                return;
            }
        };
        buffer.extend_from_slice(&chunk_bytes);

        while let Some(newline_pos) = memchr(b'\n', &buffer) {
            let line = std::str::from_utf8(&buffer[..newline_pos]).map(|s| s.trim().to_string());
            buffer.drain(..=newline_pos);
            let line = match line {
                Ok(line) => line,
                Err(err) => {
                    warn!("Invalid UTF-8 in stream: {err}");
                    continue;
                }
            };
            if !forward_line(&line, decode, tx) {
                return;
            }
        }
    }

    if let Ok(rest) = std::str::from_utf8(&buffer) {
        forward_line(rest.trim(), decode, tx);
    }
}

/// Returns false once the stream should stop.
fn forward_line(
    line: &str,
    decode: fn(&str) -> SseLine,
    tx: &mpsc::UnboundedSender<Result<ProviderEvent, ProviderError>>,
) -> bool {
    match process_sse_line(line, decode) {
        SseLine::Skip => true,
        SseLine::Done => false,
        SseLine::Item(item) => {
            let keep_going = item.is_ok();
            tx.send(item).is_ok() && keep_going
        }
    }
}

/// Reads a failed response's body into an API error.
pub(crate) async fn api_error_from_response(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "<no body>".to_string());
    ProviderError::Api {
        status: Some(status),
        message: format_api_error(&error_text),
    }
}

fn extract_error_summary(value: &serde_json::Value) -> Option<String> {
    let summary = value
        .pointer("/error/message")
        .and_then(|v| v.as_str())
        .map(str::to_owned)
        .or_else(|| {
            value.get("error").and_then(|v| match v {
                serde_json::Value::String(s) => Some(s.to_string()),
                _ => None,
            })
        })
        .or_else(|| {
            value
                .get("message")
                .and_then(|v| v.as_str().map(str::to_owned))
        });

    summary.map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// User-facing rendering of an error body: a one-line summary when one can be
/// found, followed by the body in a fenced block.
pub fn format_api_error(error_text: &str) -> String {
    let trimmed = error_text.trim();

    if trimmed.is_empty() {
        return "API Error:\n```\n<empty>\n```".to_string();
    }

    if let Ok(json_value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        if let Ok(pretty_json) = serde_json::to_string_pretty(&json_value) {
            return match extract_error_summary(&json_value).filter(|s| !s.is_empty()) {
                Some(summary) => format!("API Error: {summary}\n```json\n{pretty_json}\n```"),
                None => format!("API Error:\n```json\n{pretty_json}\n```"),
            };
        }
    }

    if trimmed.starts_with('<') && trimmed.ends_with('>') {
        format!("API Error:\n```xml\n{trimmed}\n```")
    } else {
        format!("API Error:\n```\n{trimmed}\n```")
    }
}
