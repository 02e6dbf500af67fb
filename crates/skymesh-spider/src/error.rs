//! Spider client error types.

use thiserror::Error;

/// Result type alias for Spider calls.
pub type SpiderResult<T> = Result<T, SpiderError>;

/// Errors surfaced by the Spider client.
#[derive(Debug, Error)]
pub enum SpiderError {
    /// Non-2xx response; the body is carried verbatim.
    #[error("csp error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for SpiderError {
    fn from(err: reqwest::Error) -> Self {
        SpiderError::Transport(err.to_string())
    }
}
