use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    pub fn is_user(self) -> bool {
        self == Role::User
    }

    pub fn is_assistant(self) -> bool {
        self == Role::Assistant
    }

    pub fn is_system(self) -> bool {
        self == Role::System
    }
}

impl AsRef<str> for Role {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl TryFrom<&str> for Role {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            _ => Err(format!("invalid message role: {value}")),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Model deliberation shown separately from the answer.
///
/// Carries the only UI/timing state in a transcript and is never sent back to
/// a provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningContent {
    pub text: String,
    #[serde(default)]
    pub is_collapsed: bool,
    #[serde(default)]
    pub is_completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentItem {
    Text {
        text: String,
    },
    #[serde(rename = "image_url")]
    Image {
        image_url: ImageUrl,
    },
    Reasoning(ReasoningContent),
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        ContentItem::Text { text: text.into() }
    }

    pub fn image(url: impl Into<String>) -> Self {
        ContentItem::Image {
            image_url: ImageUrl {
                url: url.into(),
                detail: None,
            },
        }
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(self, ContentItem::Reasoning(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentItem::Text { text } => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentItem>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentItem>) -> Self {
        Self { role, content }
    }

    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self::new(role, vec![ContentItem::text(text)])
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// The empty assistant message a generation writes into.
    pub fn assistant_placeholder() -> Self {
        Self::assistant("")
    }

    pub fn is_user(&self) -> bool {
        self.role.is_user()
    }

    pub fn is_assistant(&self) -> bool {
        self.role.is_assistant()
    }

    /// Text of the answer block at index 0, or "" when the message has none.
    pub fn answer_text(&self) -> &str {
        self.content
            .first()
            .and_then(ContentItem::as_text)
            .unwrap_or_default()
    }

    pub(crate) fn answer_text_mut(&mut self) -> Option<&mut String> {
        match self.content.first_mut() {
            Some(ContentItem::Text { text }) => Some(text),
            _ => None,
        }
    }

    pub fn reasoning(&self) -> Option<&ReasoningContent> {
        self.content.iter().find_map(|item| match item {
            ContentItem::Reasoning(reasoning) => Some(reasoning),
            _ => None,
        })
    }

    pub fn reasoning_mut(&mut self) -> Option<&mut ReasoningContent> {
        self.content.iter_mut().find_map(|item| match item {
            ContentItem::Reasoning(reasoning) => Some(reasoning),
            _ => None,
        })
    }

    /// Returns the reasoning block, inserting an empty one at index 1 when the
    /// message has none yet.
    pub(crate) fn reasoning_or_insert(&mut self) -> &mut ReasoningContent {
        let index = match self.content.iter().position(ContentItem::is_reasoning) {
            Some(index) => index,
            None => {
                let at = self.content.len().min(1);
                self.content
                    .insert(at, ContentItem::Reasoning(ReasoningContent::default()));
                at
            }
        };
        match &mut self.content[index] {
            ContentItem::Reasoning(reasoning) => reasoning,
            _ => unreachable!("index points at a reasoning block"),
        }
    }

    /// A copy with reasoning blocks removed, as sent to providers.
    pub fn without_reasoning(&self) -> Message {
        Message {
            role: self.role,
            content: self
                .content
                .iter()
                .filter(|item| !item.is_reasoning())
                .cloned()
                .collect(),
        }
    }

    /// True for an assistant message that never received any text or
    /// reasoning.
    pub fn is_empty_assistant(&self) -> bool {
        self.is_assistant()
            && self.content.iter().all(|item| match item {
                ContentItem::Text { text } => text.is_empty(),
                ContentItem::Reasoning(reasoning) => reasoning.text.is_empty(),
                ContentItem::Image { .. } => false,
            })
    }
}
