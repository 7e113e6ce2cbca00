//! Fills one assistant message from a delta sequence.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use pulse_core::config::ChatConfig;
use pulse_core::message::{ChatMessage, MessageState};
use pulse_core::stream::is_error_delta;
use pulse_sse::controller::DeltaSource;

use crate::session::SessionHandle;

/// Lifecycle of one assistant turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamerState {
    Pending,
    Streaming,
    Complete,
    Error,
}

impl StreamerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Owns the in-progress assistant message of a single turn.
///
/// Every content update is published through the session handle, so
/// subscribers see the message grow delta by delta. Only this streamer
/// writes to its message; other writers are shut out once it leaves
/// `Streaming` because the session refuses updates to frozen messages.
pub struct ChatMessageStreamer {
    session: Arc<SessionHandle>,
    pacing_delay: Duration,
    error_apology: Option<String>,
    message_id: Option<Uuid>,
    content: String,
    state: StreamerState,
}

impl ChatMessageStreamer {
    pub fn new(session: Arc<SessionHandle>, config: &ChatConfig) -> Self {
        Self {
            session,
            pacing_delay: config.pacing_delay,
            error_apology: config.error_apology.clone(),
            message_id: None,
            content: String::new(),
            state: StreamerState::Pending,
        }
    }

    pub fn state(&self) -> StreamerState {
        self.state
    }

    pub fn message_id(&self) -> Option<Uuid> {
        self.message_id
    }

    /// Text accumulated so far, before any error substitution.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Append the empty placeholder message. Calling it again returns the same id.
    pub fn start(&mut self) -> Uuid {
        if let Some(id) = self.message_id {
            return id;
        }
        let id = self
            .session
            .push_message(ChatMessage::assistant_placeholder());
        self.message_id = Some(id);
        self.state = StreamerState::Streaming;
        debug!(message_id = %id, "Assistant message streaming");
        id
    }

    /// Drain `source` into the message and return the final state.
    ///
    /// An `"Error: "` delta ends consumption at once. A source that ends by
    /// cancellation leaves the message exactly as last written.
    pub async fn consume<S: DeltaSource>(&mut self, source: &mut S) -> StreamerState {
        let id = self.start();
        if self.state != StreamerState::Streaming {
            return self.state;
        }

        let mut first = true;
        while let Some(delta) = source.next().await {
            if std::mem::take(&mut first) {
                if let Some(conversation_id) = conversation_id(&delta) {
                    debug!(%conversation_id, "Adopting conversation id");
                    self.session.set_conversation_id(conversation_id);
                    continue;
                }
            }

            if is_error_delta(&delta) {
                self.fail_with(&delta);
                return self.state;
            }

            self.content.push_str(&delta);
            let content = &self.content;
            self.session.update_message(id, |m| m.content.clone_from(content));

            if !self.pacing_delay.is_zero() {
                tokio::time::sleep(self.pacing_delay).await;
            }
        }

        if source.ended_by_cancel() {
            debug!(message_id = %id, "Stream cancelled, message left as is");
            return self.state;
        }
        self.finish(MessageState::Complete, None);
        self.state
    }

    /// Put the message into `Error` with `text` as its content, or the
    /// configured apology when one is set.
    pub fn fail_with(&mut self, text: &str) {
        self.start();
        if self.state != StreamerState::Streaming {
            return;
        }
        let shown = self.error_apology.clone().unwrap_or_else(|| text.to_string());
        debug!(reason = text, "Assistant message failed");
        self.finish(MessageState::Error, Some(shown));
    }

    fn finish(&mut self, state: MessageState, content: Option<String>) {
        let Some(id) = self.message_id else {
            return;
        };
        self.session.update_message(id, |m| {
            if let Some(content) = content {
                m.content = content;
            }
            m.state = state;
        });
        self.state = match state {
            MessageState::Error => StreamerState::Error,
            MessageState::Complete => StreamerState::Complete,
            MessageState::Streaming => StreamerState::Streaming,
        };
        debug!(message_id = %id, state = ?self.state, "Assistant message settled");
    }
}

/// The backend may open a stream with `{"conversation_id": "..."}`.
fn conversation_id(delta: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(delta).ok()?;
    value.get("conversation_id")?.as_str().map(str::to_string)
}
