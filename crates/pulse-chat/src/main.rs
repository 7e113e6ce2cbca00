use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use pulse_chat::backend::{CsvFile, HealthDataSource, StaticCsv, StaticToken};
use pulse_chat::client::ChatClient;
use pulse_chat::history::SessionHistory;
use pulse_core::config::ClientConfig;
use pulse_core::error::Result;
use pulse_core::message::Role;
use pulse_core::session::ChatSession;

fn config_path() -> Option<PathBuf> {
    std::env::var_os("PULSE_CONFIG")
        .map(PathBuf::from)
        .or_else(|| dirs::config_dir().map(|dir| dir.join("pulse").join("config.yaml")))
}

fn load_config() -> Result<ClientConfig> {
    let mut config = match config_path() {
        Some(path) if path.exists() => {
            tracing::info!(path = %path.display(), "Loading config");
            ClientConfig::load(&path)?
        }
        _ => ClientConfig::default(),
    };
    if let Ok(base_url) = std::env::var("PULSE_BASE_URL") {
        config.chat.base_url = base_url.trim_end_matches('/').to_string();
    }
    config.validate()?;
    Ok(config)
}

/// Echo the newest assistant message to stdout as it grows.
async fn print_replies(rx: watch::Receiver<ChatSession>) {
    let mut updates = WatchStream::new(rx);
    let mut stdout = tokio::io::stdout();
    let mut current: Option<Uuid> = None;
    let mut shown = String::new();
    let mut settled = false;

    while let Some(session) = updates.next().await {
        let Some(message) = session.messages.last() else {
            continue;
        };
        if message.role != Role::Assistant {
            continue;
        }
        if current != Some(message.id) {
            current = Some(message.id);
            shown.clear();
            settled = false;
        }
        if settled {
            continue;
        }

        let out = match message.content.strip_prefix(shown.as_str()) {
            Some(suffix) => suffix.to_string(),
            None => format!("\n{}", message.content),
        };
        shown.clone_from(&message.content);
        if !message.is_streaming() {
            settled = true;
        }

        let tail = if settled { "\n" } else { "" };
        let written = async {
            stdout.write_all(format!("{out}{tail}").as_bytes()).await?;
            stdout.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::warn!(error = %e, "Stdout closed, no longer echoing replies");
            return;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pulse_chat=info,pulse_sse=info".into()),
        )
        .init();

    let config = load_config()?;
    let token = std::env::var("PULSE_TOKEN").unwrap_or_default();
    let health_data: Arc<dyn HealthDataSource> = match std::env::var_os("PULSE_HEALTH_CSV") {
        Some(path) => Arc::new(CsvFile::new(path)),
        None => Arc::new(StaticCsv::default()),
    };
    let client = ChatClient::from_config(&config, Arc::new(StaticToken::new(token)), health_data)?;

    let history = SessionHistory::new();
    let session = history.create().await;
    tokio::spawn(print_replies(session.subscribe()));

    tracing::info!(base_url = %config.chat.base_url, session_id = %session.id(), "Pulse chat ready");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        };
        let Some(line) = line else {
            break;
        };
        tokio::select! {
            result = client.send_message(&session, &line) => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Turn failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                // Dropping the turn closes its stream.
                tracing::info!("Turn cancelled");
            }
        }
    }
    Ok(())
}
