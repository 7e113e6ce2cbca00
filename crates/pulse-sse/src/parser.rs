//! Turns one event block into a typed [`Event`].

use pulse_core::stream::{Event, EventKind};

use crate::accumulator::RawEventBlock;

/// Parse one block into an event.
///
/// Recognized lines are `event:`, `data:` and `id:`; anything else is
/// ignored. When a block has several `data:` lines only the last one is
/// kept, so multi-line payloads are not joined. A block without data yields
/// `None`.
pub fn parse_event(block: &RawEventBlock) -> Option<Event> {
    let mut kind = EventKind::Message;
    let mut data = String::new();
    let mut id = None;

    for line in block.as_str().split('\n') {
        let line = line.trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("event:") {
            kind = EventKind::from_field(value.trim());
        } else if let Some(value) = line.strip_prefix("data:") {
            data = value.trim().to_string();
        } else if let Some(value) = line.strip_prefix("id:") {
            id = Some(value.trim().to_string());
        }
    }

    if data.is_empty() {
        return None;
    }

    Some(Event { kind, data, id })
}
