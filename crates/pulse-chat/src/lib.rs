//! Chat layer: fills assistant messages from delta streams and keeps
//! sessions observable.

pub mod backend;
pub mod client;
pub mod history;
pub mod session;
pub mod streamer;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::backend::{
        CodeInterpreterSelector, CsvFile, FixedSelector, HealthDataSource, HttpSelector,
        RequestFactory, StaticCsv, StaticToken, TokenProvider,
    };
    pub use crate::client::{ChatClient, TurnReport};
    pub use crate::history::SessionHistory;
    pub use crate::session::{BusyGuard, SessionHandle};
    pub use crate::streamer::{ChatMessageStreamer, StreamerState};
}
