//! Automatic chat titles.

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::chat::{Chat, ChatId};
use crate::core::delta::normalize_response;
use crate::core::generation::GenerationError;
use crate::core::message::{ContentItem, Message, Role};
use crate::core::providers::{CompletionRequest, ProviderAdapter};
use crate::core::think_parser::{ThinkMarkers, ThinkParser};
use crate::core::transcript::{TranscriptError, TranscriptStore};

pub fn title_prompt(language: &str) -> String {
    format!(
        "Generate a title in less than 6 words for the conversation so far (language: {language})"
    )
}

/// A chat gets an automatic title once, after its first completed exchange.
pub fn should_generate_title(chat: &Chat, auto_title: bool) -> bool {
    if !auto_title || chat.title_set {
        return false;
    }
    let mut tail = chat.messages.iter().rev();
    let answered = tail
        .next()
        .is_some_and(|m| m.is_assistant() && !m.answer_text().is_empty());
    answered && tail.next().is_some_and(|m| m.is_user())
}

/// One user message carrying the last exchange (reasoning stripped) followed
/// by the title instruction.
pub fn build_title_request(chat: &Chat, title_model: Option<&str>, language: &str) -> CompletionRequest {
    let mut content: Vec<ContentItem> = Vec::new();
    let start = chat.messages.len().saturating_sub(2);
    for message in &chat.messages[start..] {
        content.extend(message.without_reasoning().content);
    }
    content.push(ContentItem::text(title_prompt(language)));

    let mut config = chat.config.clone();
    if let Some(model) = title_model.filter(|model| !model.is_empty()) {
        config.model = model.to_string();
    }
    CompletionRequest {
        config,
        messages: vec![Message::new(Role::User, content)],
    }
}

/// Trims the reply and removes one pair of surrounding quotes.
pub fn clean_title(raw: &str) -> Option<String> {
    let mut title = raw.trim();
    for (open, close) in [('"', '"'), ('\'', '\''), ('\u{201c}', '\u{201d}')] {
        if title.len() >= 2 && title.starts_with(open) && title.ends_with(close) {
            let inner_start = open.len_utf8();
            let inner_end = title.len() - close.len_utf8();
            if inner_start <= inner_end {
                title = title[inner_start..inner_end].trim();
            }
            break;
        }
    }
    (!title.is_empty()).then(|| title.to_string())
}

/// Asks the model for a title and stores it. Returns `Ok(None)` when the chat
/// already has one or the reply was blank.
pub async fn generate_title(
    adapter: &dyn ProviderAdapter,
    store: &TranscriptStore,
    chat_id: &ChatId,
    title_model: Option<&str>,
    language: &str,
    cancel: &CancellationToken,
) -> Result<Option<String>, GenerationError> {
    let chat = store
        .snapshot(chat_id)
        .ok_or_else(|| TranscriptError::UnknownChat(chat_id.clone()))?;
    if chat.title_set {
        return Ok(None);
    }
    let request = build_title_request(&chat, title_model, language);
    drop(chat);

    let response = adapter
        .complete(&request, cancel)
        .await
        .map_err(GenerationError::Provider)?;
    let delta = normalize_response(&response);

    let mut parser = ThinkParser::new(ThinkMarkers::default());
    let mut parsed = parser.process(delta.content_str());
    parsed.extend(parser.flush());

    let Some(title) = clean_title(&parsed.content) else {
        debug!(chat_id = %chat_id, "title reply was empty");
        return Ok(None);
    };
    store.set_title(chat_id, title.clone())?;
    debug!(chat_id = %chat_id, title = %title, "chat titled");
    Ok(Some(title))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use crate::api::ChatCompletion;
    use crate::core::chat::ChatConfig;
    use crate::core::delta::ProviderResponse;
    use crate::core::persistence::{read_transcript_file, DeferredJsonWriter};
    use crate::core::providers::{ProviderError, ProviderEventStream};

    struct TitleAdapter {
        reply: String,
        seen: Mutex<Option<CompletionRequest>>,
    }

    #[async_trait]
    impl ProviderAdapter for TitleAdapter {
        async fn complete(
            &self,
            request: &CompletionRequest,
            _cancel: &CancellationToken,
        ) -> Result<ProviderResponse, ProviderError> {
            *self.seen.lock().expect("lock") = Some(request.clone());
            let completion: ChatCompletion = serde_json::from_value(serde_json::json!({
                "choices": [{"message": {"role": "assistant", "content": self.reply}}]
            }))
            .expect("completion");
            Ok(ProviderResponse::OpenAi(completion))
        }

        async fn stream(
            &self,
            _request: &CompletionRequest,
            _cancel: &CancellationToken,
        ) -> Result<ProviderEventStream, ProviderError> {
            Err(ProviderError::Transport("titles are not streamed".into()))
        }
    }

    fn answered_chat() -> Chat {
        let mut answer = Message::assistant("Paris is the capital.");
        answer.reasoning_or_insert().text.push_str("recall geography");
        Chat::new(ChatId::new("t"), ChatConfig::for_model("gpt-4o"))
            .with_messages([Message::system("be helpful"), Message::user("Capital of France?"), answer])
    }

    #[test]
    fn quotes_and_whitespace_are_removed() {
        assert_eq!(clean_title("  \"French Capital\"\n"), Some("French Capital".to_string()));
        assert_eq!(clean_title("\u{201c}Trip Plans\u{201d}"), Some("Trip Plans".to_string()));
        assert_eq!(clean_title("'Quoted'"), Some("Quoted".to_string()));
        assert_eq!(clean_title("Say \"hi\""), Some("Say \"hi\"".to_string()));
        assert_eq!(clean_title("\"\""), None);
        assert_eq!(clean_title("\""), Some("\"".to_string()));
        assert_eq!(clean_title("   "), None);
    }

    #[test]
    fn titles_only_after_an_answered_exchange() {
        let chat = answered_chat();
        assert!(should_generate_title(&chat, true));
        assert!(!should_generate_title(&chat, false));

        let mut titled = chat.clone();
        titled.title_set = true;
        assert!(!should_generate_title(&titled, true));

        let pending = Chat::new(ChatId::new("p"), ChatConfig::for_model("m"))
            .with_messages([Message::user("hi"), Message::assistant_placeholder()]);
        assert!(!should_generate_title(&pending, true));
    }

    #[test]
    fn request_carries_last_exchange_without_reasoning() {
        let request = build_title_request(&answered_chat(), Some("gpt-4o-mini"), "French");
        assert_eq!(request.config.model, "gpt-4o-mini");
        assert_eq!(request.messages.len(), 1);
        let content = &request.messages[0].content;
        assert_eq!(content.len(), 3);
        assert_eq!(content[0].as_text(), Some("Capital of France?"));
        assert_eq!(content[1].as_text(), Some("Paris is the capital."));
        assert_eq!(
            content[2].as_text(),
            Some("Generate a title in less than 6 words for the conversation so far (language: French)")
        );
        assert!(content.iter().all(|item| !item.is_reasoning()));
    }

    #[tokio::test]
    async fn generated_title_is_stored() {
        let store = TranscriptStore::in_memory();
        let chat = answered_chat();
        let chat_id = chat.id.clone();
        store.insert_chat(chat);
        let adapter = TitleAdapter {
            reply: "<think>short</think>\"French Capital\"".to_string(),
            seen: Mutex::new(None),
        };

        let title = generate_title(&adapter, &store, &chat_id, None, "English", &CancellationToken::new())
            .await
            .expect("title");
        assert_eq!(title.as_deref(), Some("French Capital"));

        let stored = store.snapshot(&chat_id).expect("chat");
        assert_eq!(stored.title, "French Capital");
        assert!(stored.title_set);
        let seen = adapter.seen.lock().expect("lock").clone().expect("request");
        assert_eq!(seen.config.model, "gpt-4o");

        let again = generate_title(&adapter, &store, &chat_id, None, "English", &CancellationToken::new())
            .await
            .expect("title");
        assert_eq!(again, None);
    }

    #[tokio::test]
    async fn generated_title_is_saved_with_the_transcript() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (writer, task) = DeferredJsonWriter::spawn(dir.path().to_path_buf());
        let store = TranscriptStore::new(Arc::new(writer));
        let chat = answered_chat();
        let chat_id = chat.id.clone();
        store.insert_chat(chat);
        let adapter = TitleAdapter {
            reply: "Capital Cities".to_string(),
            seen: Mutex::new(None),
        };

        generate_title(&adapter, &store, &chat_id, None, "English", &CancellationToken::new())
            .await
            .expect("title");
        drop(store);
        task.await.expect("writer task");

        let stored = read_transcript_file(dir.path(), &chat_id).expect("read");
        assert_eq!(stored.title, "Capital Cities");
        assert!(stored.title_set);
        assert_eq!(stored.messages.len(), 3);
    }
}
