//! The byte-producing side of a stream.
//!
//! A [`Transport`] pushes body chunks into a bounded channel through a
//! [`ByteSink`]; the consumer pulls them on its own task.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Method;
use tokio::sync::mpsc;

use pulse_core::error::TransportError;

/// Headers every streaming request carries.
pub const SSE_HEADERS: [(&str, &str); 3] = [
    ("Accept", "text/event-stream"),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
];

/// A file attached to a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field_name: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl FilePart {
    /// A CSV upload under the `file` field.
    pub fn csv(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            field_name: "file".into(),
            file_name: file_name.into(),
            mime: "text/csv".into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum RequestBody {
    #[default]
    Empty,
    Json(serde_json::Value),
    Multipart {
        file: FilePart,
        fields: Vec<(String, String)>,
    },
}

/// Everything a transport needs to issue one streaming request.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl StreamRequest {
    pub fn post(url: impl Into<String>) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Set a header, replacing any existing value (names compare case-insensitively).
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn json(mut self, value: serde_json::Value) -> Self {
        self.body = RequestBody::Json(value);
        self
    }

    pub fn multipart(mut self, file: FilePart, fields: Vec<(String, String)>) -> Self {
        self.body = RequestBody::Multipart { file, fields };
        self
    }

    /// Apply [`SSE_HEADERS`], keeping every other header the caller set.
    pub fn with_sse_headers(self) -> Self {
        SSE_HEADERS
            .iter()
            .fold(self, |req, (name, value)| req.header(*name, *value))
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// What a transport reports to the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    Bytes(Bytes),
    /// The peer closed the body normally.
    End,
    Failed(TransportError),
}

/// Write half of the transport channel.
#[derive(Debug, Clone)]
pub struct ByteSink {
    tx: mpsc::Sender<TransportSignal>,
}

impl ByteSink {
    /// Push a chunk. Returns `false` once the consumer is gone.
    pub async fn push(&self, bytes: Bytes) -> bool {
        self.tx.send(TransportSignal::Bytes(bytes)).await.is_ok()
    }

    pub async fn end(self) {
        let _ = self.tx.send(TransportSignal::End).await;
    }

    pub async fn fail(self, error: TransportError) {
        let _ = self.tx.send(TransportSignal::Failed(error)).await;
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create a bounded transport channel.
pub fn channel(capacity: usize) -> (ByteSink, mpsc::Receiver<TransportSignal>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (ByteSink { tx }, rx)
}

/// Issues a request and feeds its response body into a sink.
///
/// `run` returns when the body ends, fails, or the sink reports that the
/// consumer is gone. The future may also be dropped at any await point when
/// the stream is cancelled; dropping it must close the connection.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn run(&self, request: StreamRequest, sink: ByteSink);
}
