//! Collaborators that turn a user turn into a streaming request.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use pulse_core::config::StreamConfig;
use pulse_core::error::{PulseError, Result, TransportError};
use pulse_sse::transport::{FilePart, StreamRequest};

pub const SIMPLE_CHAT_PATH: &str = "/simple-chat/";
pub const ANALYZE_HEALTH_DATA_PATH: &str = "/analyze-health-data/";
pub const CODE_INTERPRETER_PATH: &str = "/should-use-code-interpreter/";

pub const CONVERSATION_ID_HEADER: &str = "X-Conversation-ID";
pub const HEALTH_CSV_FILE_NAME: &str = "health_data.csv";

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

/// Supplies the bearer token for backend calls.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A fixed token.
#[derive(Debug, Clone)]
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn token(&self) -> Result<String> {
        if self.0.is_empty() {
            return Err(PulseError::Other("no auth token configured".into()));
        }
        Ok(self.0.clone())
    }
}

// ---------------------------------------------------------------------------
// Health data
// ---------------------------------------------------------------------------

/// Supplies the CSV export attached to analysis requests.
#[async_trait]
pub trait HealthDataSource: Send + Sync {
    async fn health_csv(&self) -> Result<Vec<u8>>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticCsv(Vec<u8>);

impl StaticCsv {
    pub fn new(csv: impl Into<Vec<u8>>) -> Self {
        Self(csv.into())
    }
}

#[async_trait]
impl HealthDataSource for StaticCsv {
    async fn health_csv(&self) -> Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

/// Reads the CSV from disk on every turn.
#[derive(Debug, Clone)]
pub struct CsvFile(PathBuf);

impl CsvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }
}

#[async_trait]
impl HealthDataSource for CsvFile {
    async fn health_csv(&self) -> Result<Vec<u8>> {
        let bytes = tokio::fs::read(&self.0).await?;
        debug!(path = %self.0.display(), bytes = bytes.len(), "Loaded health CSV");
        Ok(bytes)
    }
}

// ---------------------------------------------------------------------------
// Code interpreter routing
// ---------------------------------------------------------------------------

/// Decides whether a turn goes to the analysis endpoint.
#[async_trait]
pub trait CodeInterpreterSelector: Send + Sync {
    async fn should_use(&self, input: &str) -> Result<bool>;
}

/// Always gives the same answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedSelector(pub bool);

#[async_trait]
impl CodeInterpreterSelector for FixedSelector {
    async fn should_use(&self, _input: &str) -> Result<bool> {
        Ok(self.0)
    }
}

#[derive(Debug, Serialize)]
struct SelectorRequest<'a> {
    user_input: &'a str,
}

#[derive(Debug, Deserialize)]
struct SelectorResponse {
    use_code_interpreter: bool,
}

/// Asks the backend.
pub struct HttpSelector {
    client: reqwest::Client,
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HttpSelector {
    pub fn new(
        base_url: impl Into<String>,
        tokens: Arc<dyn TokenProvider>,
        config: &StreamConfig,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.total_timeout)
            .build()
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        })
    }
}

#[async_trait]
impl CodeInterpreterSelector for HttpSelector {
    async fn should_use(&self, input: &str) -> Result<bool> {
        let token = self.tokens.token().await?;
        let url = format!("{}{CODE_INTERPRETER_PATH}", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&SelectorRequest { user_input: input })
            .send()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TransportError::Read(e.to_string()))?;
        if !status.is_success() {
            warn!(%url, status = status.as_u16(), "Code interpreter check rejected");
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }

        let decision: SelectorResponse = serde_json::from_str(&body)?;
        debug!(use_code_interpreter = decision.use_code_interpreter, "Code interpreter decision");
        Ok(decision.use_code_interpreter)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Builds authenticated streaming requests for the chat endpoints.
#[derive(Clone)]
pub struct RequestFactory {
    base_url: String,
    tokens: Arc<dyn TokenProvider>,
}

impl RequestFactory {
    pub fn new(base_url: impl Into<String>, tokens: Arc<dyn TokenProvider>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Plain chat turn: JSON body, conversation id in a header.
    pub async fn simple_chat(&self, input: &str, conversation_id: &str) -> Result<StreamRequest> {
        let token = self.tokens.token().await?;
        Ok(StreamRequest::post(self.endpoint(SIMPLE_CHAT_PATH))
            .bearer(&token)
            .header(CONVERSATION_ID_HEADER, conversation_id)
            .json(serde_json::json!({ "user_input": input })))
    }

    /// Analysis turn: the health CSV and the text fields as multipart form data.
    pub async fn analyze_health_data(
        &self,
        csv: Vec<u8>,
        input: &str,
        conversation_id: &str,
    ) -> Result<StreamRequest> {
        let token = self.tokens.token().await?;
        Ok(StreamRequest::post(self.endpoint(ANALYZE_HEALTH_DATA_PATH))
            .bearer(&token)
            .multipart(
                FilePart::csv(HEALTH_CSV_FILE_NAME, csv),
                vec![
                    ("user_input".into(), input.to_string()),
                    ("conversation_id".into(), conversation_id.to_string()),
                ],
            ))
    }
}
