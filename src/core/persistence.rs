//! Durable storage for transcripts.
//!
//! The store hands every committed chat to a [`TranscriptWriter`]. Writers
//! may defer or batch; nothing in the ingestion path waits for disk.

use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::chat::{Chat, ChatId};
use crate::core::message::Message;

/// Receives the chat as committed: title, title flag and the full message
/// list. Chats are cheap to clone since messages are shared.
pub trait TranscriptWriter: Send + Sync {
    fn write(&self, chat: Chat);
}

/// Discards writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullWriter;

impl TranscriptWriter for NullWriter {
    fn write(&self, _chat: Chat) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceError {
    /// The chat id cannot be used as a file name.
    InvalidChatId(ChatId),
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::InvalidChatId(id) => {
                write!(f, "Chat id {id:?} is not usable as a transcript file name")
            }
        }
    }
}

impl Error for PersistenceError {}

#[derive(Serialize)]
struct StoredTranscriptRef<'a> {
    chat_id: &'a ChatId,
    title: &'a str,
    title_set: bool,
    saved_at: DateTime<Utc>,
    messages: Vec<&'a Message>,
}

#[derive(Debug, Deserialize)]
pub struct StoredTranscript {
    pub chat_id: ChatId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub title_set: bool,
    pub saved_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

/// `<dir>/<chat_id>.json`. Ids made of anything other than ASCII letters,
/// digits, `-` and `_` are rejected so the path stays inside `dir`.
pub fn transcript_path(dir: &Path, chat_id: &ChatId) -> Result<PathBuf, PersistenceError> {
    let id = chat_id.as_str();
    let usable = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !usable {
        return Err(PersistenceError::InvalidChatId(chat_id.clone()));
    }
    Ok(dir.join(format!("{id}.json")))
}

/// Writes `<dir>/<chat_id>.json` via a temp file in the same directory, so a
/// reader never observes a half-written transcript.
pub fn write_transcript_file(dir: &Path, chat: &Chat) -> Result<PathBuf, Box<dyn Error>> {
    let target = transcript_path(dir, &chat.id)?;
    fs::create_dir_all(dir)?;

    let record = StoredTranscriptRef {
        chat_id: &chat.id,
        title: &chat.title,
        title_set: chat.title_set,
        saved_at: Utc::now(),
        messages: chat.messages.iter().map(|message| message.as_ref()).collect(),
    };
    let contents = serde_json::to_vec_pretty(&record)?;

    let mut temp_file = NamedTempFile::new_in(dir)?;
    temp_file.write_all(&contents)?;
    temp_file.as_file_mut().sync_all()?;
    temp_file
        .persist(&target)
        .map_err(|err| -> Box<dyn Error> { Box::new(err) })?;
    Ok(target)
}

pub fn read_transcript_file(dir: &Path, chat_id: &ChatId) -> Result<StoredTranscript, Box<dyn Error>> {
    let contents = fs::read_to_string(transcript_path(dir, chat_id)?)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Queues writes for a background task that keeps only the newest state per
/// chat before touching disk.
#[derive(Clone)]
pub struct DeferredJsonWriter {
    tx: mpsc::UnboundedSender<Chat>,
}

impl DeferredJsonWriter {
    /// Starts the writer task. It exits once every clone of the writer has
    /// been dropped and the queue is drained.
    pub fn spawn(dir: PathBuf) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_writer(Arc::new(dir), rx));
        (Self { tx }, handle)
    }
}

impl TranscriptWriter for DeferredJsonWriter {
    fn write(&self, chat: Chat) {
        if let Err(err) = self.tx.send(chat) {
            warn!(chat_id = %err.0.id, "transcript writer has shut down; dropping write");
        }
    }
}

async fn run_writer(dir: Arc<PathBuf>, mut rx: mpsc::UnboundedReceiver<Chat>) {
    while let Some(first) = rx.recv().await {
        let mut pending: HashMap<ChatId, Chat> = HashMap::new();
        pending.insert(first.id.clone(), first);
        while let Ok(next) = rx.try_recv() {
            pending.insert(next.id.clone(), next);
        }

        for (chat_id, chat) in pending {
            let dir = Arc::clone(&dir);
            let saved = tokio::task::spawn_blocking(move || {
                write_transcript_file(&dir, &chat).map_err(|err| err.to_string())
            })
            .await;
            match saved {
                Ok(Ok(path)) => debug!(chat_id = %chat_id, path = %path.display(), "transcript saved"),
                Ok(Err(err)) => warn!(chat_id = %chat_id, "failed to save transcript: {err}"),
                Err(err) => warn!(chat_id = %chat_id, "transcript save task failed: {err}"),
            }
        }
    }
}
