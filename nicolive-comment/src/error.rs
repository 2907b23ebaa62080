//! Comment client error types

use nicolive_proto::{FrameError, WireError};
use thiserror::Error;

/// Maximum body size for whole-response fetches (16 MB).
pub const MAX_RESPONSE_SIZE: usize = 16 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP error {status} for {url}")]
    Http { status: u16, url: String },

    #[error("Connection to {url} timed out after {timeout_ms}ms")]
    ConnectTimeout { url: String, timeout_ms: u64 },

    #[error("Stream inactivity timeout")]
    InactivityTimeout,

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error("Response too large ({size} bytes, max {limit})")]
    ResponseTooLarge { size: u64, limit: usize },

    #[error("Control channel error: {0}")]
    ControlChannel(String),

    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("Broadcast page error: {0}")]
    PageData(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Reconnection failed after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    #[error("Session closed")]
    SessionClosed,
}

pub type Result<T> = std::result::Result<T, ClientError>;

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::ControlChannel(err.to_string())
    }
}

impl From<url::ParseError> for ClientError {
    fn from(err: url::ParseError) -> Self {
        Self::Parse(format!("invalid URL: {err}"))
    }
}

impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}
