pub mod config;
pub mod error;
pub mod message;
pub mod session;
pub mod stream;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{ChatConfig, ClientConfig, StreamConfig};
    pub use crate::error::{ConfigError, PulseError, Result, TransportError};
    pub use crate::message::{ChatMessage, MessageState, Role};
    pub use crate::session::ChatSession;
    pub use crate::stream::{ChunkEnvelope, Event, EventKind, StreamOutcome};
}
