use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle of a chat message. Only `Streaming` messages may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    Streaming,
    Complete,
    Error,
}

/// One entry in a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub content: String,
    pub role: Role,
    pub state: MessageState,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(content: impl Into<String>, role: Role, state: MessageState) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            role,
            state,
            timestamp: Utc::now(),
        }
    }

    /// A completed message typed by the user.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(content, Role::User, MessageState::Complete)
    }

    /// An empty assistant message waiting for its first delta.
    pub fn assistant_placeholder() -> Self {
        Self::new(String::new(), Role::Assistant, MessageState::Streaming)
    }

    pub fn is_streaming(&self) -> bool {
        self.state == MessageState::Streaming
    }
}
