//! Error types for the coachlink client

use thiserror::Error;

/// Result type alias for coachlink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the coachlink client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error (open timeout or abnormal socket close)
    #[error("connection error: {0}")]
    Connection(String),

    /// Audio device error (microphone or speaker access)
    #[error("device error: {0}")]
    Device(String),

    /// Audio processing error
    #[error("audio error: {0}")]
    Audio(String),

    /// Malformed or unexpected relay message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Save request not acknowledged in time
    #[error("save not acknowledged within {0:?}")]
    SaveTimeout(std::time::Duration),

    /// Authentication/authorization error
    #[error("auth error: {0}")]
    Auth(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}
