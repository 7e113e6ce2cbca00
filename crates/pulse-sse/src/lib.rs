//! Streaming core: raw bytes in, ordered content deltas out.
//!
//! `transport -> ByteAccumulator -> parse_event -> route_event -> DeltaStream`

pub mod accumulator;
pub mod controller;
pub mod http;
pub mod mock;
pub mod parser;
pub mod routing;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::accumulator::{ByteAccumulator, RawEventBlock};
    pub use crate::controller::{CancelHandle, DeltaSource, DeltaStream, StreamController};
    pub use crate::http::HttpTransport;
    pub use crate::mock::{MockStep, MockTransport};
    pub use crate::parser::parse_event;
    pub use crate::routing::{Routing, decode_chunk, route_event};
    pub use crate::transport::{
        ByteSink, FilePart, RequestBody, StreamRequest, Transport, TransportSignal,
    };
}
