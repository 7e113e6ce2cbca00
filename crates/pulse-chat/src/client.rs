//! One chat turn from user input to a settled assistant message.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use pulse_core::config::{ChatConfig, ClientConfig};
use pulse_core::error::{PulseError, Result};
use pulse_core::message::ChatMessage;
use pulse_core::stream::{StreamOutcome, error_delta};
use pulse_sse::controller::StreamController;
use pulse_sse::http::HttpTransport;
use pulse_sse::transport::StreamRequest;

use crate::backend::{
    CodeInterpreterSelector, HealthDataSource, HttpSelector, RequestFactory, TokenProvider,
};
use crate::session::SessionHandle;
use crate::streamer::{ChatMessageStreamer, StreamerState};

/// What happened during one [`ChatClient::send_message`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub user_message_id: Uuid,
    pub assistant_message_id: Uuid,
    pub state: StreamerState,
    /// `None` when the stream was cancelled.
    pub outcome: Option<StreamOutcome>,
    pub used_code_interpreter: bool,
}

/// Sends user turns to the chat backend and streams the replies into sessions.
pub struct ChatClient {
    controller: StreamController,
    requests: RequestFactory,
    selector: Arc<dyn CodeInterpreterSelector>,
    health_data: Arc<dyn HealthDataSource>,
    config: ChatConfig,
}

impl ChatClient {
    pub fn new(
        controller: StreamController,
        requests: RequestFactory,
        selector: Arc<dyn CodeInterpreterSelector>,
        health_data: Arc<dyn HealthDataSource>,
        config: ChatConfig,
    ) -> Self {
        Self {
            controller,
            requests,
            selector,
            health_data,
            config,
        }
    }

    /// Wire up the HTTP transport and selector from a loaded config.
    pub fn from_config(
        config: &ClientConfig,
        tokens: Arc<dyn TokenProvider>,
        health_data: Arc<dyn HealthDataSource>,
    ) -> Result<Self> {
        let transport = HttpTransport::new(&config.stream)?;
        let selector = HttpSelector::new(&config.chat.base_url, Arc::clone(&tokens), &config.stream)?;
        Ok(Self::new(
            StreamController::new(Arc::new(transport), config.stream.clone()),
            RequestFactory::new(&config.chat.base_url, tokens),
            Arc::new(selector),
            health_data,
            config.chat.clone(),
        ))
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Run one turn against `session`.
    ///
    /// Blank input does nothing and returns `Ok(None)`. A second call while a
    /// turn is still streaming into the same session fails with
    /// [`PulseError::Busy`]. Failures while preparing the request put the
    /// assistant message into `Error` and are returned; failures once the
    /// stream is open only show up in the message and the report.
    pub async fn send_message(
        &self,
        session: &Arc<SessionHandle>,
        input: &str,
    ) -> Result<Option<TurnReport>> {
        if input.trim().is_empty() {
            return Ok(None);
        }
        let turn = session.try_begin_turn().ok_or(PulseError::Busy)?;

        let user_message_id = session.push_message(ChatMessage::user(input));
        if !self.config.thinking_delay.is_zero() {
            tokio::time::sleep(self.config.thinking_delay).await;
        }

        let mut streamer = ChatMessageStreamer::new(Arc::clone(session), &self.config);
        let assistant_message_id = streamer.start();
        let cancelled = |used_code_interpreter: bool| -> Result<Option<TurnReport>> {
            info!(session_id = %session.id(), "Turn cancelled before streaming");
            Ok(Some(TurnReport {
                user_message_id,
                assistant_message_id,
                state: StreamerState::Streaming,
                outcome: None,
                used_code_interpreter,
            }))
        };
        if turn.is_cancelled() {
            return cancelled(false);
        }

        let (request, used_code_interpreter) =
            match self.prepare(input, &session.conversation_id()).await {
                Ok(prepared) => prepared,
                Err(e) => {
                    warn!(session_id = %session.id(), error = %e, "Failed to prepare chat request");
                    streamer.fail_with(&error_delta(&e));
                    return Err(e);
                }
            };
        if turn.is_cancelled() {
            return cancelled(used_code_interpreter);
        }

        let mut stream = self.controller.open(request);
        turn.attach(stream.cancel_handle());
        let state = streamer.consume(&mut stream).await;

        let report = TurnReport {
            user_message_id,
            assistant_message_id,
            state,
            outcome: stream.outcome().cloned(),
            used_code_interpreter,
        };
        info!(
            session_id = %session.id(),
            state = ?report.state,
            used_code_interpreter,
            "Turn finished"
        );
        Ok(Some(report))
    }

    async fn prepare(&self, input: &str, conversation_id: &str) -> Result<(StreamRequest, bool)> {
        if self.selector.should_use(input).await? {
            let csv = self.health_data.health_csv().await?;
            let request = self
                .requests
                .analyze_health_data(csv, input, conversation_id)
                .await?;
            Ok((request, true))
        } else {
            let request = self.requests.simple_chat(input, conversation_id).await?;
            Ok((request, false))
        }
    }
}
