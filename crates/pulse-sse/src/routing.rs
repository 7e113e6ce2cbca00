//! Maps parsed events to deltas and terminal outcomes.

use tracing::debug;

use pulse_core::stream::{ChunkEnvelope, Event, EventKind, StreamOutcome, error_delta};

/// What one event contributes to the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Routing {
    /// Delta to hand to the consumer, emitted before any outcome.
    pub delta: Option<String>,
    /// Set when this event ends the stream.
    pub outcome: Option<StreamOutcome>,
}

impl Routing {
    fn delta(text: impl Into<String>) -> Self {
        Self {
            delta: Some(text.into()),
            outcome: None,
        }
    }

    fn failed(reason: &str) -> Self {
        Self {
            delta: Some(error_delta(reason)),
            outcome: Some(StreamOutcome::Failed(reason.to_string())),
        }
    }

    fn finished() -> Self {
        Self {
            delta: None,
            outcome: Some(StreamOutcome::Finished),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }
}

/// Decode the chunk envelope carried by a message event.
pub fn decode_chunk(data: &str) -> Option<ChunkEnvelope> {
    match serde_json::from_str(data) {
        Ok(chunk) => Some(chunk),
        Err(e) => {
            debug!(error = %e, bytes = data.len(), "Dropping malformed chunk");
            None
        }
    }
}

/// Route one event.
///
/// Malformed message payloads produce nothing and leave the stream open.
pub fn route_event(event: &Event) -> Routing {
    match event.kind {
        EventKind::Message => {
            let Some(chunk) = decode_chunk(&event.data) else {
                return Routing::default();
            };
            if let Some(error) = &chunk.error {
                return Routing::failed(error);
            }
            let mut routing = match chunk.text() {
                Some(text) => Routing::delta(text),
                None => Routing::default(),
            };
            if chunk.done {
                routing.outcome = Some(StreamOutcome::Finished);
            }
            routing
        }
        EventKind::Error => Routing::failed(&event.data),
        EventKind::Done => Routing::finished(),
    }
}
