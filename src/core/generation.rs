//! Per-chat generation lifecycle and cancellation.
//!
//! Each chat has at most one live generation. Starting a new one cancels the
//! previous token, and a handle whose id is no longer current can no longer
//! change the chat's state.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::core::chat::ChatId;
use crate::core::providers::ProviderError;
use crate::core::reasoning_timer::ReasoningTimer;
use crate::core::transcript::TranscriptError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GenerationState {
    #[default]
    Idle,
    Submitting,
    Streaming,
    Completed,
    Cancelled,
    Failed,
}

impl GenerationState {
    pub fn is_active(self) -> bool {
        matches!(self, GenerationState::Submitting | GenerationState::Streaming)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    Provider(ProviderError),
    /// A non-streamed response carried neither content nor reasoning.
    EmptyResponse,
    Transcript(TranscriptError),
}

impl GenerationError {
    /// Text shown to the user when a generation fails.
    pub fn user_message(&self) -> String {
        match self {
            GenerationError::Provider(err) => err.to_string(),
            GenerationError::EmptyResponse => "The model returned an empty response.".to_string(),
            GenerationError::Transcript(err) => format!("Could not update the chat: {err}"),
        }
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationError::Provider(err) => write!(f, "provider error: {err}"),
            GenerationError::EmptyResponse => write!(f, "empty response"),
            GenerationError::Transcript(err) => write!(f, "transcript error: {err}"),
        }
    }
}

impl std::error::Error for GenerationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GenerationError::Provider(err) => Some(err),
            GenerationError::EmptyResponse => None,
            GenerationError::Transcript(err) => Some(err),
        }
    }
}

impl From<TranscriptError> for GenerationError {
    fn from(err: TranscriptError) -> Self {
        GenerationError::Transcript(err)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationOutcome {
    Completed,
    Cancelled,
    Failed(GenerationError),
}

impl GenerationOutcome {
    pub fn state(&self) -> GenerationState {
        match self {
            GenerationOutcome::Completed => GenerationState::Completed,
            GenerationOutcome::Cancelled => GenerationState::Cancelled,
            GenerationOutcome::Failed(_) => GenerationState::Failed,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, GenerationOutcome::Completed)
    }
}

/// Owned by the task driving one generation.
#[derive(Debug, Clone)]
pub struct GenerationHandle {
    pub chat_id: ChatId,
    pub generation_id: u64,
    pub cancel_token: CancellationToken,
    pub streaming: bool,
    pub timer: ReasoningTimer,
}

impl GenerationHandle {
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopDecision {
    NotGenerating,
    /// The user declined to abandon a non-streamed request.
    Declined,
    Stopped,
}

#[derive(Debug)]
struct ChatGeneration {
    generation_id: u64,
    state: GenerationState,
    cancel_token: Option<CancellationToken>,
}

#[derive(Debug, Default)]
struct ControllerState {
    next_id: u64,
    chats: HashMap<ChatId, ChatGeneration>,
}

/// Cloneable handle to the per-chat generation table.
#[derive(Debug, Clone, Default)]
pub struct GenerationController {
    state: Arc<Mutex<ControllerState>>,
}

impl GenerationController {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Begins a generation, cancelling whatever was still running for the
    /// same chat.
    pub fn start(&self, chat_id: &ChatId, streaming: bool) -> GenerationHandle {
        let mut state = self.lock();
        state.next_id += 1;
        let generation_id = state.next_id;

        if let Some(previous) = state.chats.get(chat_id) {
            if let Some(token) = &previous.cancel_token {
                debug!(
                    chat_id = %chat_id,
                    generation_id = previous.generation_id,
                    "superseding running generation"
                );
                token.cancel();
            }
        }

        let cancel_token = CancellationToken::new();
        state.chats.insert(
            chat_id.clone(),
            ChatGeneration {
                generation_id,
                state: GenerationState::Submitting,
                cancel_token: Some(cancel_token.clone()),
            },
        );
        info!(chat_id = %chat_id, generation_id, streaming, "generation started");

        GenerationHandle {
            chat_id: chat_id.clone(),
            generation_id,
            cancel_token,
            streaming,
            timer: ReasoningTimer::new(),
        }
    }

    fn with_current<T>(
        &self,
        handle: &GenerationHandle,
        f: impl FnOnce(&mut ChatGeneration) -> T,
    ) -> Option<T> {
        let mut state = self.lock();
        state
            .chats
            .get_mut(&handle.chat_id)
            .filter(|entry| entry.generation_id == handle.generation_id)
            .map(f)
    }

    pub fn is_current(&self, handle: &GenerationHandle) -> bool {
        self.with_current(handle, |_| ()).is_some()
    }

    /// `Submitting → Streaming` once the provider's stream is open.
    pub fn mark_streaming(&self, handle: &GenerationHandle) -> bool {
        self.with_current(handle, |entry| {
            if entry.state == GenerationState::Submitting {
                entry.state = GenerationState::Streaming;
                true
            } else {
                false
            }
        })
        .unwrap_or(false)
    }

    /// Records the terminal state. Ignored for superseded handles and for
    /// generations already stopped through [`cancel`](Self::cancel).
    pub fn finish(&self, handle: &GenerationHandle, outcome: &GenerationOutcome) -> bool {
        let applied = self
            .with_current(handle, |entry| {
                if !entry.state.is_active() {
                    return false;
                }
                entry.state = outcome.state();
                entry.cancel_token = None;
                true
            })
            .unwrap_or(false);
        if applied {
            info!(
                chat_id = %handle.chat_id,
                generation_id = handle.generation_id,
                state = ?outcome.state(),
                "generation finished"
            );
        }
        applied
    }

    /// Cancels the chat's running generation. Returns false when nothing was
    /// running, so repeated calls are harmless.
    pub fn cancel(&self, chat_id: &ChatId) -> bool {
        let mut state = self.lock();
        let Some(entry) = state.chats.get_mut(chat_id) else {
            return false;
        };
        if !entry.state.is_active() {
            return false;
        }
        if let Some(token) = entry.cancel_token.take() {
            token.cancel();
        }
        entry.state = GenerationState::Cancelled;
        info!(chat_id = %chat_id, generation_id = entry.generation_id, "generation cancelled");
        true
    }

    /// User-initiated stop. Streaming generations stop at once; a
    /// non-streamed request is only abandoned when `confirm` agrees.
    pub fn request_stop(
        &self,
        chat_id: &ChatId,
        supports_stream: bool,
        confirm: impl FnOnce() -> bool,
    ) -> StopDecision {
        if !self.is_generating(chat_id) {
            return StopDecision::NotGenerating;
        }
        if !supports_stream && !confirm() {
            return StopDecision::Declined;
        }
        if self.cancel(chat_id) {
            StopDecision::Stopped
        } else {
            StopDecision::NotGenerating
        }
    }

    pub fn is_generating(&self, chat_id: &ChatId) -> bool {
        self.state(chat_id).is_active()
    }

    pub fn generating_chat_ids(&self) -> Vec<ChatId> {
        let state = self.lock();
        let mut ids: Vec<ChatId> = state
            .chats
            .iter()
            .filter(|(_, entry)| entry.state.is_active())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn state(&self, chat_id: &ChatId) -> GenerationState {
        self.lock()
            .chats
            .get(chat_id)
            .map(|entry| entry.state)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(id: &str) -> ChatId {
        ChatId::new(id)
    }

    #[test]
    fn lifecycle_moves_through_states() {
        let controller = GenerationController::new();
        let id = chat("a");
        assert_eq!(controller.state(&id), GenerationState::Idle);

        let handle = controller.start(&id, true);
        assert_eq!(controller.state(&id), GenerationState::Submitting);
        assert!(controller.mark_streaming(&handle));
        assert!(!controller.mark_streaming(&handle));
        assert_eq!(controller.state(&id), GenerationState::Streaming);
        assert_eq!(controller.generating_chat_ids(), vec![id.clone()]);

        assert!(controller.finish(&handle, &GenerationOutcome::Completed));
        assert_eq!(controller.state(&id), GenerationState::Completed);
        assert!(controller.generating_chat_ids().is_empty());
        assert!(!controller.finish(&handle, &GenerationOutcome::Cancelled));
    }

    #[test]
    fn starting_again_cancels_and_supersedes() {
        let controller = GenerationController::new();
        let id = chat("a");
        let first = controller.start(&id, true);
        let second = controller.start(&id, true);

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert!(!controller.is_current(&first));
        assert!(controller.is_current(&second));
        assert!(second.generation_id > first.generation_id);

        assert!(!controller.finish(&first, &GenerationOutcome::Cancelled));
        assert_eq!(controller.state(&id), GenerationState::Submitting);
    }

    #[test]
    fn cancel_is_idempotent() {
        let controller = GenerationController::new();
        let id = chat("a");
        assert!(!controller.cancel(&id));

        let handle = controller.start(&id, true);
        assert!(controller.cancel(&id));
        assert!(handle.is_cancelled());
        assert_eq!(controller.state(&id), GenerationState::Cancelled);
        assert!(!controller.cancel(&id));

        assert!(!controller.finish(&handle, &GenerationOutcome::Completed));
        assert_eq!(controller.state(&id), GenerationState::Cancelled);
    }

    #[test]
    fn failed_outcome_records_failed_state() {
        let controller = GenerationController::new();
        let id = chat("a");
        let handle = controller.start(&id, false);
        let outcome = GenerationOutcome::Failed(GenerationError::EmptyResponse);
        assert!(controller.finish(&handle, &outcome));
        assert_eq!(controller.state(&id), GenerationState::Failed);
        assert!(!controller.cancel(&id));
    }

    #[test]
    fn chats_are_independent() {
        let controller = GenerationController::new();
        let a = controller.start(&chat("a"), true);
        let b = controller.start(&chat("b"), true);
        assert!(controller.cancel(&chat("a")));
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
        assert_eq!(controller.generating_chat_ids(), vec![chat("b")]);
    }

    #[test]
    fn stopping_non_streamed_requests_needs_confirmation() {
        let controller = GenerationController::new();
        let id = chat("a");
        assert_eq!(
            controller.request_stop(&id, false, || true),
            StopDecision::NotGenerating
        );

        let handle = controller.start(&id, false);
        assert_eq!(controller.request_stop(&id, false, || false), StopDecision::Declined);
        assert!(!handle.is_cancelled());

        assert_eq!(controller.request_stop(&id, false, || true), StopDecision::Stopped);
        assert!(handle.is_cancelled());
    }

    #[test]
    fn streaming_stop_skips_confirmation() {
        let controller = GenerationController::new();
        let id = chat("a");
        let handle = controller.start(&id, true);
        let decision = controller.request_stop(&id, true, || panic!("no prompt for streams"));
        assert_eq!(decision, StopDecision::Stopped);
        assert!(handle.is_cancelled());
    }

    #[test]
    fn user_messages_describe_failures() {
        let err = GenerationError::Provider(ProviderError::Api {
            status: Some(401),
            message: "bad key".into(),
        });
        assert_eq!(err.user_message(), "HTTP 401: bad key");
        assert_eq!(
            GenerationError::EmptyResponse.user_message(),
            "The model returned an empty response."
        );
    }
}
