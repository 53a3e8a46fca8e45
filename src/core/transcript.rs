//! Shared transcript store.
//!
//! Every mutation reads the latest committed chat, copies only the message it
//! touches (`Arc::make_mut`), mutates it, and commits, all inside one short
//! synchronous critical section. Nothing holds the lock across an await, so a
//! generation always writes on top of whatever other tasks committed while it
//! was waiting on the network.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use crate::core::chat::{Chat, ChatConfig, ChatId};
use crate::core::delta::StreamDelta;
use crate::core::message::{ContentItem, Message, ReasoningContent};
use crate::core::persistence::{NullWriter, TranscriptWriter};
use crate::core::reasoning_timer::ReasoningStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptError {
    /// No chat with this id is in the store.
    UnknownChat(ChatId),
    /// The chat's last message is not an assistant message.
    NoAssistantMessage(ChatId),
    /// The assistant message has no text block at index 0.
    MissingTextBlock(ChatId),
    /// The message index does not exist or holds no reasoning block.
    NoReasoningBlock { chat_id: ChatId, index: usize },
}

impl fmt::Display for TranscriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptError::UnknownChat(id) => write!(f, "Unknown chat: {id}"),
            TranscriptError::NoAssistantMessage(id) => {
                write!(f, "Chat {id} has no assistant message to write into")
            }
            TranscriptError::MissingTextBlock(id) => {
                write!(f, "Assistant message in chat {id} has no text block")
            }
            TranscriptError::NoReasoningBlock { chat_id, index } => {
                write!(f, "Message {index} in chat {chat_id} has no reasoning block")
            }
        }
    }
}

impl std::error::Error for TranscriptError {}

#[derive(Default)]
struct StoreState {
    chats: HashMap<ChatId, Chat>,
    revision: u64,
}

/// Cloneable handle to the shared arena of chats.
#[derive(Clone)]
pub struct TranscriptStore {
    state: Arc<Mutex<StoreState>>,
    writer: Arc<dyn TranscriptWriter>,
}

impl Default for TranscriptStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl TranscriptStore {
    pub fn new(writer: Arc<dyn TranscriptWriter>) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState::default())),
            writer,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(NullWriter))
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `mutate` on the latest committed chat. When it reports a change,
    /// the revision is bumped and a copy of the chat goes to the writer after
    /// the lock is released.
    fn commit<T>(
        &self,
        chat_id: &ChatId,
        mutate: impl FnOnce(&mut Chat) -> Result<(T, bool), TranscriptError>,
    ) -> Result<T, TranscriptError> {
        let (value, written) = {
            let mut state = self.lock();
            let chat = state
                .chats
                .get_mut(chat_id)
                .ok_or_else(|| TranscriptError::UnknownChat(chat_id.clone()))?;
            let (value, changed) = mutate(chat)?;
            let written = changed.then(|| chat.clone());
            if changed {
                state.revision += 1;
            }
            (value, written)
        };

        if let Some(chat) = written {
            self.writer.write(chat);
        }
        Ok(value)
    }

    pub fn insert_chat(&self, chat: Chat) {
        let written = chat.clone();
        {
            let mut state = self.lock();
            state.chats.insert(chat.id.clone(), chat);
            state.revision += 1;
        }
        self.writer.write(written);
    }

    pub fn remove_chat(&self, chat_id: &ChatId) -> Option<Chat> {
        let mut state = self.lock();
        let removed = state.chats.remove(chat_id);
        if removed.is_some() {
            state.revision += 1;
        }
        removed
    }

    pub fn contains(&self, chat_id: &ChatId) -> bool {
        self.lock().chats.contains_key(chat_id)
    }

    pub fn chat_ids(&self) -> Vec<ChatId> {
        let mut ids: Vec<ChatId> = self.lock().chats.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Increases on every committed change.
    pub fn revision(&self) -> u64 {
        self.lock().revision
    }

    /// Point-in-time copy of a chat. Cheap: messages are shared until the
    /// store next writes to one of them.
    pub fn snapshot(&self, chat_id: &ChatId) -> Option<Chat> {
        self.lock().chats.get(chat_id).cloned()
    }

    pub fn messages(&self, chat_id: &ChatId) -> Option<Vec<Arc<Message>>> {
        self.lock()
            .chats
            .get(chat_id)
            .map(|chat| chat.messages.clone())
    }

    pub fn config(&self, chat_id: &ChatId) -> Option<ChatConfig> {
        self.lock()
            .chats
            .get(chat_id)
            .map(|chat| chat.config.clone())
    }

    pub fn push_message(&self, chat_id: &ChatId, message: Message) -> Result<usize, TranscriptError> {
        self.commit(chat_id, |chat| {
            chat.messages.push(Arc::new(message));
            Ok((chat.messages.len() - 1, true))
        })
    }

    /// Appends the empty assistant message a generation writes into.
    pub fn begin_assistant_message(&self, chat_id: &ChatId) -> Result<usize, TranscriptError> {
        self.push_message(chat_id, Message::assistant_placeholder())
    }

    /// Applies one normalized delta to the chat's trailing assistant message.
    ///
    /// Reasoning text goes to the reasoning block at index 1 (created on first
    /// use), answer text to the text block at index 0, and `status` updates the
    /// reasoning block's timing. Returns `Ok(false)` without committing when
    /// there is nothing to change.
    pub fn apply_delta(
        &self,
        chat_id: &ChatId,
        delta: &StreamDelta,
        status: ReasoningStatus,
    ) -> Result<bool, TranscriptError> {
        if delta.is_empty() && status.is_inactive() {
            return Ok(false);
        }

        self.commit(chat_id, |chat| {
            let message = trailing_assistant(chat)?;
            if !matches!(message.content.first(), Some(ContentItem::Text { .. })) {
                return Err(TranscriptError::MissingTextBlock(chat_id.clone()));
            }
            let has_reasoning_block = message.reasoning().is_some();
            if !delta.has_reasoning() && !delta.has_content() && !has_reasoning_block {
                return Ok((false, false));
            }

            let message = Arc::make_mut(message);
            if delta.has_reasoning() {
                message
                    .reasoning_or_insert()
                    .text
                    .push_str(delta.reasoning_str());
            }
            if let Some(reasoning) = message.reasoning_mut() {
                apply_status(reasoning, status);
            }
            if let Some(text) = message.answer_text_mut() {
                text.push_str(delta.content_str());
            }
            Ok((true, true))
        })
    }

    /// Freezes the reasoning block of the trailing assistant message.
    pub fn finalize_reasoning(
        &self,
        chat_id: &ChatId,
        duration_seconds: u64,
    ) -> Result<bool, TranscriptError> {
        self.commit(chat_id, |chat| {
            let message = trailing_assistant(chat)?;
            if message.reasoning().is_none() {
                return Ok((false, false));
            }
            if let Some(reasoning) = Arc::make_mut(message).reasoning_mut() {
                apply_status(reasoning, ReasoningStatus::Finalized { duration_seconds });
            }
            Ok((true, true))
        })
    }

    /// Collapse/expand toggle. Text and timing are left untouched.
    pub fn set_reasoning_collapsed(
        &self,
        chat_id: &ChatId,
        index: usize,
        collapsed: bool,
    ) -> Result<(), TranscriptError> {
        self.commit(chat_id, |chat| {
            let missing = || TranscriptError::NoReasoningBlock {
                chat_id: chat_id.clone(),
                index,
            };
            let message = chat.messages.get_mut(index).ok_or_else(missing)?;
            let current = message
                .reasoning()
                .map(|reasoning| reasoning.is_collapsed)
                .ok_or_else(missing)?;
            if current == collapsed {
                return Ok(((), false));
            }
            if let Some(reasoning) = Arc::make_mut(message).reasoning_mut() {
                reasoning.is_collapsed = collapsed;
            }
            Ok(((), true))
        })
    }

    /// Drops a trailing assistant message that never received any text.
    pub fn remove_trailing_empty_assistant(&self, chat_id: &ChatId) -> Result<bool, TranscriptError> {
        self.commit(chat_id, |chat| {
            let removable = chat
                .messages
                .last()
                .is_some_and(|message| message.is_empty_assistant());
            if removable {
                chat.messages.pop();
                debug!(chat_id = %chat_id, "removed empty assistant placeholder");
            }
            Ok((removable, removable))
        })
    }

    pub fn set_title(&self, chat_id: &ChatId, title: String) -> Result<(), TranscriptError> {
        self.commit(chat_id, |chat| {
            chat.title = title;
            chat.title_set = true;
            Ok(((), true))
        })
    }
}

fn trailing_assistant(chat: &mut Chat) -> Result<&mut Arc<Message>, TranscriptError> {
    match chat.messages.last_mut() {
        Some(message) if message.is_assistant() => Ok(message),
        _ => Err(TranscriptError::NoAssistantMessage(chat.id.clone())),
    }
}

fn apply_status(reasoning: &mut ReasoningContent, status: ReasoningStatus) {
    match status {
        ReasoningStatus::Inactive => {}
        ReasoningStatus::Open { duration_seconds } => {
            reasoning.duration_seconds = Some(duration_seconds);
            reasoning.is_completed = false;
        }
        ReasoningStatus::Finalized { duration_seconds } => {
            reasoning.duration_seconds = Some(duration_seconds);
            reasoning.is_completed = true;
            reasoning.is_collapsed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::Role;

    #[derive(Default)]
    struct RecordingWriter {
        writes: Mutex<Vec<Chat>>,
    }

    impl TranscriptWriter for RecordingWriter {
        fn write(&self, chat: Chat) {
            self.writes.lock().expect("writes").push(chat);
        }
    }

    fn store_with_chat(id: &str) -> (TranscriptStore, ChatId) {
        let store = TranscriptStore::in_memory();
        let chat_id = ChatId::new(id);
        store.insert_chat(
            Chat::new(chat_id.clone(), ChatConfig::for_model("m"))
                .with_messages([Message::user("hi")]),
        );
        store.begin_assistant_message(&chat_id).expect("placeholder");
        (store, chat_id)
    }

    fn last(store: &TranscriptStore, chat_id: &ChatId) -> Message {
        store
            .messages(chat_id)
            .and_then(|messages| messages.last().map(|m| m.as_ref().clone()))
            .expect("last message")
    }

    #[test]
    fn reasoning_block_is_created_at_index_one() {
        let (store, chat_id) = store_with_chat("c");
        store
            .apply_delta(&chat_id, &StreamDelta::content("Hel"), ReasoningStatus::Inactive)
            .expect("content");
        store
            .apply_delta(
                &chat_id,
                &StreamDelta::reasoning("think"),
                ReasoningStatus::Open { duration_seconds: 1 },
            )
            .expect("reasoning");
        store
            .apply_delta(
                &chat_id,
                &StreamDelta::reasoning("ing"),
                ReasoningStatus::Open { duration_seconds: 2 },
            )
            .expect("reasoning");
        store
            .apply_delta(
                &chat_id,
                &StreamDelta::content("lo"),
                ReasoningStatus::Finalized { duration_seconds: 3 },
            )
            .expect("content");

        let message = last(&store, &chat_id);
        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content.len(), 2);
        assert_eq!(message.answer_text(), "Hello");
        let reasoning = message.reasoning().expect("reasoning");
        assert!(message.content[1].is_reasoning());
        assert_eq!(reasoning.text, "thinking");
        assert_eq!(reasoning.duration_seconds, Some(3));
        assert!(reasoning.is_completed);
        assert!(reasoning.is_collapsed);
    }

    #[test]
    fn open_status_keeps_block_expanded_and_incomplete() {
        let (store, chat_id) = store_with_chat("c");
        store
            .apply_delta(
                &chat_id,
                &StreamDelta::reasoning("r"),
                ReasoningStatus::Open { duration_seconds: 1 },
            )
            .expect("apply");
        let message = last(&store, &chat_id);
        let reasoning = message.reasoning().expect("reasoning");
        assert!(!reasoning.is_collapsed);
        assert!(!reasoning.is_completed);
        assert_eq!(reasoning.duration_seconds, Some(1));
    }

    #[test]
    fn empty_delta_does_not_commit() {
        let (store, chat_id) = store_with_chat("c");
        let before = store.revision();
        let changed = store
            .apply_delta(&chat_id, &StreamDelta::default(), ReasoningStatus::Inactive)
            .expect("apply");
        assert!(!changed);
        let changed = store
            .apply_delta(
                &chat_id,
                &StreamDelta::default(),
                ReasoningStatus::Open { duration_seconds: 2 },
            )
            .expect("apply");
        assert!(!changed);
        assert_eq!(store.revision(), before);
    }

    #[test]
    fn snapshots_are_isolated_from_later_writes() {
        let (store, chat_id) = store_with_chat("c");
        let before = store.snapshot(&chat_id).expect("snapshot");
        store
            .apply_delta(&chat_id, &StreamDelta::content("new"), ReasoningStatus::Inactive)
            .expect("apply");

        assert_eq!(before.messages.last().expect("last").answer_text(), "");
        let after = store.snapshot(&chat_id).expect("snapshot");
        assert_eq!(after.messages.last().expect("last").answer_text(), "new");
        assert!(Arc::ptr_eq(&before.messages[0], &after.messages[0]));
    }

    #[test]
    fn writes_go_to_the_writer_with_full_message_list() {
        let writer = Arc::new(RecordingWriter::default());
        let store = TranscriptStore::new(writer.clone());
        let chat_id = ChatId::new("w");
        store.insert_chat(
            Chat::new(chat_id.clone(), ChatConfig::for_model("m")).with_messages([Message::user("q")]),
        );
        store.begin_assistant_message(&chat_id).expect("placeholder");
        store
            .apply_delta(&chat_id, &StreamDelta::content("a"), ReasoningStatus::Inactive)
            .expect("apply");
        store
            .apply_delta(&chat_id, &StreamDelta::default(), ReasoningStatus::Inactive)
            .expect("noop");

        let writes = writer.writes.lock().expect("writes");
        assert_eq!(writes.len(), 3);
        let last = writes.last().expect("write");
        assert_eq!(last.id, chat_id);
        assert_eq!(last.messages.len(), 2);
        assert_eq!(last.messages[1].answer_text(), "a");
    }

    #[test]
    fn title_changes_reach_the_writer() {
        let writer = Arc::new(RecordingWriter::default());
        let store = TranscriptStore::new(writer.clone());
        let chat_id = ChatId::new("t");
        store.insert_chat(
            Chat::new(chat_id.clone(), ChatConfig::for_model("m")).with_messages([Message::user("q")]),
        );
        store.set_title(&chat_id, "Questions".into()).expect("title");

        let writes = writer.writes.lock().expect("writes");
        assert_eq!(writes.len(), 2);
        let last = writes.last().expect("write");
        assert_eq!(last.title, "Questions");
        assert!(last.title_set);
        assert_eq!(last.messages.len(), 1);
    }

    #[test]
    fn errors_for_unknown_chat_and_missing_assistant() {
        let store = TranscriptStore::in_memory();
        let missing = ChatId::new("nope");
        assert_eq!(
            store.apply_delta(&missing, &StreamDelta::content("x"), ReasoningStatus::Inactive),
            Err(TranscriptError::UnknownChat(missing.clone()))
        );

        let chat_id = ChatId::new("u");
        store.insert_chat(
            Chat::new(chat_id.clone(), ChatConfig::for_model("m")).with_messages([Message::user("q")]),
        );
        assert_eq!(
            store.apply_delta(&chat_id, &StreamDelta::content("x"), ReasoningStatus::Inactive),
            Err(TranscriptError::NoAssistantMessage(chat_id.clone()))
        );
    }

    #[test]
    fn collapse_toggle_changes_only_the_flag() {
        let (store, chat_id) = store_with_chat("t");
        store
            .apply_delta(
                &chat_id,
                &StreamDelta::reasoning("why"),
                ReasoningStatus::Finalized { duration_seconds: 4 },
            )
            .expect("apply");

        store.set_reasoning_collapsed(&chat_id, 1, false).expect("expand");
        let reasoning = last(&store, &chat_id).reasoning().cloned().expect("reasoning");
        assert!(!reasoning.is_collapsed);
        assert_eq!(reasoning.text, "why");
        assert_eq!(reasoning.duration_seconds, Some(4));
        assert!(reasoning.is_completed);

        assert!(matches!(
            store.set_reasoning_collapsed(&chat_id, 0, true),
            Err(TranscriptError::NoReasoningBlock { index: 0, .. })
        ));
    }

    #[test]
    fn finalize_and_cleanup_helpers() {
        let (store, chat_id) = store_with_chat("f");
        assert!(!store.finalize_reasoning(&chat_id, 2).expect("no block"));
        assert!(store.remove_trailing_empty_assistant(&chat_id).expect("remove"));
        assert!(!store.remove_trailing_empty_assistant(&chat_id).expect("user last"));
        assert_eq!(store.messages(&chat_id).expect("messages").len(), 1);

        store.set_title(&chat_id, "Greeting".into()).expect("title");
        let chat = store.snapshot(&chat_id).expect("chat");
        assert!(chat.title_set);
        assert_eq!(chat.title, "Greeting");
    }
}
