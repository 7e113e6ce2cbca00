//! Scripted transport for tests and offline runs.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use pulse_core::error::TransportError;

use crate::transport::{ByteSink, StreamRequest, Transport};

/// One scripted action of a [`MockTransport`].
#[derive(Debug, Clone)]
pub enum MockStep {
    Chunk(Bytes),
    Delay(Duration),
    Fail(TransportError),
    /// Keep the connection open without sending anything.
    Hang,
}

impl MockStep {
    pub fn chunk(bytes: impl AsRef<[u8]>) -> Self {
        Self::Chunk(Bytes::copy_from_slice(bytes.as_ref()))
    }
}

/// Scripted transport for testing without HTTP.
///
/// Plays its steps in order for every request, then ends the body unless a
/// step failed or hung. Each request is recorded.
pub struct MockTransport {
    steps: Vec<MockStep>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl MockTransport {
    pub fn new(steps: Vec<MockStep>) -> Self {
        Self {
            steps,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Deliver each chunk as its own receive, then end the body.
    pub fn chunks<I, S>(chunks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        Self::new(chunks.into_iter().map(MockStep::chunk).collect())
    }

    /// Fail before any byte arrives.
    pub fn failing(error: TransportError) -> Self {
        Self::new(vec![MockStep::Fail(error)])
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn run(&self, request: StreamRequest, sink: ByteSink) {
        self.requests.lock().unwrap().push(request);

        for step in &self.steps {
            match step {
                MockStep::Chunk(bytes) => {
                    if !sink.push(bytes.clone()).await {
                        return;
                    }
                }
                MockStep::Delay(duration) => tokio::time::sleep(*duration).await,
                MockStep::Fail(error) => return sink.fail(error.clone()).await,
                MockStep::Hang => std::future::pending::<()>().await,
            }
        }
        sink.end().await;
    }
}
