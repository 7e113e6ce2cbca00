use serde::{Deserialize, Serialize};

/// Prefix carried by every delta that reports a failure.
pub const ERROR_PREFIX: &str = "Error: ";

/// Kind of a parsed SSE event, taken from its `event:` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Ordinary payload event (no `event:` line, or an unrecognized value).
    #[default]
    Message,
    /// In-band failure reported by the server.
    Error,
    /// Server signals the end of the stream.
    Done,
}

impl EventKind {
    /// Map an `event:` field value to a kind. Matching is case-sensitive.
    pub fn from_field(value: &str) -> Self {
        match value {
            "error" => Self::Error,
            "done" => Self::Done,
            _ => Self::Message,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Message => write!(f, "message"),
            Self::Error => write!(f, "error"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// One complete SSE event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Event {
    pub fn message(data: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Message,
            data: data.into(),
            id: None,
        }
    }

    pub fn error(data: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Error,
            data: data.into(),
            id: None,
        }
    }

    pub fn done(data: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Done,
            data: data.into(),
            id: None,
        }
    }
}

/// JSON payload carried in the `data` field of a message event.
///
/// `done` is required: a payload without it does not decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEnvelope {
    #[serde(default)]
    pub content: Option<String>,
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

impl ChunkEnvelope {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            done: false,
            error: None,
        }
    }

    pub fn done() -> Self {
        Self {
            content: None,
            done: true,
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            content: None,
            done: false,
            error: Some(error.into()),
        }
    }

    /// Content worth emitting as a delta, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.as_deref().filter(|c| !c.is_empty())
    }
}

/// Terminal value of a stream. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum StreamOutcome {
    Finished,
    Failed(String),
}

impl StreamOutcome {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

impl std::fmt::Display for StreamOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finished => write!(f, "finished"),
            Self::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// Render a failure reason as a delta.
pub fn error_delta(reason: impl std::fmt::Display) -> String {
    format!("{ERROR_PREFIX}{reason}")
}

/// Whether a delta reports a failure rather than content.
pub fn is_error_delta(delta: &str) -> bool {
    delta.starts_with(ERROR_PREFIX)
}
