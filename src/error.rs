//! Errors raised while talking to AstrBot

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// Non-2xx response; `detail` is the decoded JSON body or the raw text
    #[error("AstrBot API error: HTTP {status}")]
    Status { status: u16, detail: Value },

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Login failed: {0}")]
    Login(String),

    /// An SSE endpoint answered with something else
    #[error("{0}")]
    NotEventStream(String),

    #[error("SSE stream was idle for more than {0} seconds")]
    StreamIdle(u64),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Best-effort payload for the `detail` field of tool errors.
    pub fn detail(&self) -> Value {
        match self {
            Self::Status { detail, .. } => detail.clone(),
            other => Value::String(other.to_string()),
        }
    }

    /// True when AstrBot could not be reached at all.
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Transport(e) if e.is_connect() || e.is_timeout())
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
