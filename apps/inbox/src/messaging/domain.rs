use chrono::{DateTime, SecondsFormat, Utc};

pub use shared_proto::conversation::{Conversation, ConversationStatus};
pub use shared_proto::history::{HistoryPage, Pagination};
pub use shared_proto::message::{Direction, Message, MessageStatus, StatusDelta, MAX_BODY_CHARS};

/// Parses an API timestamp. `None` for anything that is not RFC 3339.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Identity used for autoscroll: survives reconciliation of an optimistic send.
pub fn display_key(message: &Message) -> &str {
    message.client_id.as_deref().unwrap_or(&message.id)
}

/// Reason attached to a send that did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub code: Option<String>,
    pub message: String,
}

impl SendFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

/// Immutable view of one conversation thread, oldest message first.
#[derive(Debug, Clone, Default)]
pub struct ThreadSnapshot {
    pub conversation_id: Option<String>,
    pub messages: Vec<Message>,
    pub has_more: bool,
    pub version: u64,
}

impl ThreadSnapshot {
    pub fn newest(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn oldest(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
