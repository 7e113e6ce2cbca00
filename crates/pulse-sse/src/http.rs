//! reqwest-backed [`Transport`].

use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, warn};

use pulse_core::config::StreamConfig;
use pulse_core::error::{Result, TransportError};

use crate::transport::{ByteSink, RequestBody, StreamRequest, Transport};

/// Streams a response body over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &StreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self { client })
    }

    /// Use a preconfigured client (for testing).
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn build(&self, request: StreamRequest) -> std::result::Result<reqwest::RequestBuilder, TransportError> {
        let mut builder = self.client.request(request.method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(&value),
            RequestBody::Multipart { file, fields } => {
                let part = reqwest::multipart::Part::bytes(file.bytes)
                    .file_name(file.file_name)
                    .mime_str(&file.mime)
                    .map_err(|e| TransportError::Connect(e.to_string()))?;
                let form = fields
                    .into_iter()
                    .fold(reqwest::multipart::Form::new(), |form, (name, value)| {
                        form.text(name, value)
                    })
                    .part(file.field_name, part);
                builder.multipart(form)
            }
        };
        Ok(builder)
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() || e.is_request() || e.is_builder() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Read(e.to_string())
    }
}

/// A first chunk that is a bare JSON error object rather than SSE framing.
///
/// Some backends answer a failed stream with `200` and a plain JSON body.
/// Only the first chunk is inspected: later chunks can legitimately hold the
/// tail of an `"error":null` envelope without a `data:` prefix.
fn raw_backend_error(first_chunk: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(first_chunk).ok()?.trim();
    if text.starts_with('{') && text.contains("\"error\"") && !text.contains("data:") {
        Some(text.to_string())
    } else {
        None
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn run(&self, request: StreamRequest, sink: ByteSink) {
        let url = request.url.clone();
        let builder = match self.build(request) {
            Ok(builder) => builder,
            Err(e) => return sink.fail(e).await,
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(%url, error = %e, "Stream request failed");
                return sink.fail(map_reqwest_error(e)).await;
            }
        };

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read response body".into());
            warn!(%url, status = status.as_u16(), "Stream rejected");
            return sink
                .fail(TransportError::Status {
                    status: status.as_u16(),
                    body,
                })
                .await;
        }

        let mut body = response.bytes_stream();
        let mut first = true;
        while let Some(chunk) = body.next().await {
            match chunk {
                Ok(bytes) => {
                    if first {
                        first = false;
                        if let Some(text) = raw_backend_error(&bytes) {
                            warn!(%url, "Backend answered with a bare error body");
                            return sink.fail(TransportError::Backend(text)).await;
                        }
                    }
                    if !sink.push(bytes).await {
                        debug!(%url, "Consumer gone, closing response");
                        return;
                    }
                }
                Err(e) => {
                    warn!(%url, error = %e, "Stream read failed");
                    return sink.fail(map_reqwest_error(e)).await;
                }
            }
        }
        sink.end().await;
    }
}
