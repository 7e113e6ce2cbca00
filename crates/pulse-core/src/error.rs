use thiserror::Error;

/// Top-level error type for the Pulse client.
#[derive(Debug, Error)]
pub enum PulseError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("A response is already streaming for this session")]
    Busy,

    #[error("{0}")]
    Other(String),
}

/// Failures of the byte-producing side of a stream.
///
/// Once a stream is open these never travel as `Err`: the controller renders
/// them with `Display` into an `"Error: "` delta.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, PulseError>;
