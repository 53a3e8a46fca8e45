//! TUI-less "say" command

use std::error::Error;
use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::chat::{Chat, ChatConfig, ChatId};
use crate::core::config::Config;
use crate::core::generation::{GenerationController, GenerationOutcome};
use crate::core::ingest::{run_generation, GenerationOptions};
use crate::core::message::Message;
use crate::core::persistence::{DeferredJsonWriter, NullWriter, TranscriptWriter};
use crate::core::providers::build_adapter;
use crate::core::title::{generate_title, should_generate_title};
use crate::core::transcript::TranscriptStore;

pub struct SayOptions {
    pub prompt: String,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub no_stream: bool,
    pub show_reasoning: bool,
}

#[derive(Default)]
struct Printed {
    answer: usize,
    reasoning: usize,
}

/// Echoes newly committed answer text to stdout (and reasoning to stderr)
/// before passing the write on.
struct TerminalEcho {
    inner: Arc<dyn TranscriptWriter>,
    show_reasoning: bool,
    printed: Mutex<Printed>,
}

impl TranscriptWriter for TerminalEcho {
    fn write(&self, chat: Chat) {
        if let Some(last) = chat.messages.last().filter(|m| m.is_assistant()) {
            let mut printed = self.printed.lock().unwrap_or_else(PoisonError::into_inner);
            if self.show_reasoning {
                if let Some(reasoning) = last.reasoning() {
                    if let Some(fresh) = reasoning.text.get(printed.reasoning..) {
                        eprint!("{fresh}");
                        printed.reasoning = reasoning.text.len();
                    }
                }
            }
            let answer = last.answer_text();
            if let Some(fresh) = answer.get(printed.answer..).filter(|s| !s.is_empty()) {
                print!("{fresh}");
                if let Err(err) = io::stdout().flush() {
                    debug!("could not flush stdout: {err}");
                }
                printed.answer = answer.len();
            }
        }
        self.inner.write(chat);
    }
}

pub async fn run_say(config: &Config, options: SayOptions) -> Result<(), Box<dyn Error>> {
    if options.prompt.trim().is_empty() {
        eprintln!("Usage: streamscribe say <prompt>");
        std::process::exit(1);
    }

    let Some(provider) = config.resolve_provider(options.provider.as_deref()) else {
        eprintln!(
            "❌ Unknown provider: {}",
            options
                .provider
                .as_deref()
                .or(config.default_provider.as_deref())
                .unwrap_or_default()
        );
        std::process::exit(1);
    };
    let model = config.resolve_model(options.model.as_deref(), &provider);
    let streaming = !options.no_stream && config.supports_stream(&model);

    let storage_dir = config.resolved_storage_dir();
    let mut writer_task = None;
    let inner: Arc<dyn TranscriptWriter> = match storage_dir.clone() {
        Some(dir) => {
            let (writer, task) = DeferredJsonWriter::spawn(dir);
            writer_task = Some(task);
            Arc::new(writer)
        }
        None => Arc::new(NullWriter),
    };
    let store = TranscriptStore::new(Arc::new(TerminalEcho {
        inner,
        show_reasoning: options.show_reasoning,
        printed: Mutex::new(Printed::default()),
    }));

    let chat_id = ChatId::generate()?;
    store.insert_chat(
        Chat::new(chat_id.clone(), ChatConfig::for_model(model.clone()))
            .with_messages([Message::user(options.prompt)]),
    );
    info!(chat_id = %chat_id, provider = %provider.id, model = %model, streaming, "sending prompt");

    let adapter = build_adapter(&provider, reqwest::Client::new());
    let controller = GenerationController::new();
    let generation_options = GenerationOptions::new(streaming, config.think_markers.clone());
    let outcome = run_generation(
        adapter.as_ref(),
        &controller,
        &store,
        &chat_id,
        &generation_options,
    )
    .await;

    if options.show_reasoning {
        eprintln!();
    }
    println!();

    if let GenerationOutcome::Failed(err) = &outcome {
        eprintln!("\n❌ Error: {}", err.user_message());
    }

    if outcome.is_completed() && storage_dir.is_some() {
        let wants_title = store
            .snapshot(&chat_id)
            .is_some_and(|chat| should_generate_title(&chat, config.auto_title_enabled()));
        if wants_title {
            let title = generate_title(
                adapter.as_ref(),
                &store,
                &chat_id,
                config.title_model.as_deref(),
                config.title_language(),
                &CancellationToken::new(),
            )
            .await;
            match title {
                Ok(Some(title)) => {
                    info!(chat_id = %chat_id, title = %title, "chat titled");
                    eprintln!("📝 {title}");
                }
                Ok(None) => {}
                Err(err) => warn!(chat_id = %chat_id, "title generation failed: {err}"),
            }
        }
    }

    drop(store);
    if let Some(task) = writer_task {
        if let Err(err) = task.await {
            warn!("transcript writer stopped unexpectedly: {err}");
        }
    }

    if matches!(outcome, GenerationOutcome::Failed(_)) {
        std::process::exit(1);
    }
    Ok(())
}
