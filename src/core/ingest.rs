//! Drives one generation from provider events to committed transcript
//! updates.

use std::time::Instant;

use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::core::chat::ChatId;
use crate::core::delta::{normalize_event, normalize_response, StreamDelta};
use crate::core::generation::{
    GenerationController, GenerationError, GenerationHandle, GenerationOutcome,
};
use crate::core::providers::{CompletionRequest, ProviderAdapter, ProviderError};
use crate::core::reasoning_timer::ReasoningStatus;
use crate::core::think_parser::{ThinkMarkers, ThinkParser};
use crate::core::transcript::{TranscriptError, TranscriptStore};

/// Splits inline reasoning out of the content channel and commits each delta
/// in arrival order.
pub struct StreamIngestor {
    store: TranscriptStore,
    parser: ThinkParser,
}

impl StreamIngestor {
    pub fn new(store: TranscriptStore, markers: ThinkMarkers) -> Self {
        Self {
            store,
            parser: ThinkParser::new(markers),
        }
    }

    pub fn ingest(
        &mut self,
        handle: &mut GenerationHandle,
        delta: &StreamDelta,
    ) -> Result<bool, TranscriptError> {
        self.ingest_at(handle, delta, Instant::now())
    }

    /// Native reasoning passes through untouched; only the content side is
    /// scanned for markers.
    pub fn ingest_at(
        &mut self,
        handle: &mut GenerationHandle,
        delta: &StreamDelta,
        now: Instant,
    ) -> Result<bool, TranscriptError> {
        let parsed = self.parser.process(delta.content_str());
        let mut reasoning = delta.reasoning_str().to_string();
        reasoning.push_str(&parsed.reasoning);
        self.apply(handle, StreamDelta::from_parts(parsed.content, reasoning), now)
    }

    fn apply(
        &mut self,
        handle: &mut GenerationHandle,
        delta: StreamDelta,
        now: Instant,
    ) -> Result<bool, TranscriptError> {
        if delta.has_reasoning() {
            handle.timer.observe_reasoning(now);
        }
        let status = handle.timer.status(now, delta.has_content());
        self.store.apply_delta(&handle.chat_id, &delta, status)
    }

    pub fn finish(&mut self, handle: &mut GenerationHandle) -> Result<(), TranscriptError> {
        self.finish_at(handle, Instant::now())
    }

    /// Flushes the parser's carry and freezes a reasoning timer that never saw
    /// an answer.
    pub fn finish_at(
        &mut self,
        handle: &mut GenerationHandle,
        now: Instant,
    ) -> Result<(), TranscriptError> {
        let rest = self.parser.flush();
        if !rest.is_empty() {
            self.apply(handle, StreamDelta::from_parts(rest.content, rest.reasoning), now)?;
        }
        if let ReasoningStatus::Finalized { duration_seconds } = handle.timer.finish(now) {
            self.store.finalize_reasoning(&handle.chat_id, duration_seconds)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    pub streaming: bool,
    pub markers: ThinkMarkers,
}

impl GenerationOptions {
    pub fn new(streaming: bool, markers: ThinkMarkers) -> Self {
        Self { streaming, markers }
    }
}

enum Stop {
    Cancelled,
    Failed(GenerationError),
}

impl From<ProviderError> for Stop {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Cancelled => Stop::Cancelled,
            other => Stop::Failed(GenerationError::Provider(other)),
        }
    }
}

impl From<TranscriptError> for Stop {
    fn from(err: TranscriptError) -> Self {
        Stop::Failed(GenerationError::Transcript(err))
    }
}

/// Runs one generation for `chat_id`: appends the assistant placeholder,
/// calls the provider, and feeds every event through the ingestor until the
/// stream ends, fails, or is cancelled.
pub async fn run_generation(
    adapter: &dyn ProviderAdapter,
    controller: &GenerationController,
    store: &TranscriptStore,
    chat_id: &ChatId,
    options: &GenerationOptions,
) -> GenerationOutcome {
    let Some(chat) = store.snapshot(chat_id) else {
        return GenerationOutcome::Failed(GenerationError::Transcript(
            TranscriptError::UnknownChat(chat_id.clone()),
        ));
    };
    let request = CompletionRequest::new(chat.config.clone(), &chat.messages);
    drop(chat);

    let mut handle = controller.start(chat_id, options.streaming);
    if let Err(err) = store.begin_assistant_message(chat_id) {
        let outcome = GenerationOutcome::Failed(err.into());
        controller.finish(&handle, &outcome);
        return outcome;
    }

    let mut ingestor = StreamIngestor::new(store.clone(), options.markers.clone());
    let driven = if options.streaming {
        drive_stream(adapter, controller, &request, &mut handle, &mut ingestor).await
    } else {
        drive_completion(adapter, &request, &mut handle, &mut ingestor).await
    };

    let outcome = match driven {
        Ok(()) => match ingestor.finish(&mut handle) {
            Ok(()) => GenerationOutcome::Completed,
            Err(err) => GenerationOutcome::Failed(err.into()),
        },
        Err(Stop::Cancelled) => {
            // A superseding generation may already own the trailing message.
            if controller.is_current(&handle) {
                settle_stopped(store, &mut handle, &mut ingestor);
            }
            GenerationOutcome::Cancelled
        }
        Err(Stop::Failed(err)) => {
            warn!(chat_id = %chat_id, generation_id = handle.generation_id, "generation failed: {err}");
            if controller.is_current(&handle) {
                settle_stopped(store, &mut handle, &mut ingestor);
            }
            GenerationOutcome::Failed(err)
        }
    };

    controller.finish(&handle, &outcome);
    outcome
}

/// Keeps whatever was committed, emits the parser's carry, freezes open
/// reasoning, and drops a placeholder that never received anything.
fn settle_stopped(
    store: &TranscriptStore,
    handle: &mut GenerationHandle,
    ingestor: &mut StreamIngestor,
) {
    if let Err(err) = ingestor.finish(handle) {
        debug!(chat_id = %handle.chat_id, "could not settle stopped generation: {err}");
    }
    if let Err(err) = store.remove_trailing_empty_assistant(&handle.chat_id) {
        debug!(chat_id = %handle.chat_id, "could not drop empty placeholder: {err}");
    }
}

async fn drive_stream(
    adapter: &dyn ProviderAdapter,
    controller: &GenerationController,
    request: &CompletionRequest,
    handle: &mut GenerationHandle,
    ingestor: &mut StreamIngestor,
) -> Result<(), Stop> {
    let token = handle.cancel_token.clone();
    let mut events = tokio::select! {
        opened = adapter.stream(request, &token) => opened?,
        _ = token.cancelled() => return Err(Stop::Cancelled),
    };
    controller.mark_streaming(handle);

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(Stop::Cancelled),
            next = events.next() => next,
        };
        let Some(item) = next else {
            return Ok(());
        };
        if token.is_cancelled() {
            return Err(Stop::Cancelled);
        }
        let delta = normalize_event(&item?);
        ingestor.ingest(handle, &delta)?;
    }
}

async fn drive_completion(
    adapter: &dyn ProviderAdapter,
    request: &CompletionRequest,
    handle: &mut GenerationHandle,
    ingestor: &mut StreamIngestor,
) -> Result<(), Stop> {
    let token = handle.cancel_token.clone();
    let response = tokio::select! {
        response = adapter.complete(request, &token) => response?,
        _ = token.cancelled() => return Err(Stop::Cancelled),
    };
    if token.is_cancelled() {
        return Err(Stop::Cancelled);
    }
    let delta = normalize_response(&response);
    if !delta.has_content() {
        return Err(Stop::Failed(GenerationError::EmptyResponse));
    }
    ingestor.ingest(handle, &delta)?;
    Ok(())
}
