//! Error types shared by the collaborator clients.

use thiserror::Error;

/// Result alias used across the relay.
pub type Result<T> = std::result::Result<T, Error>;

/// Failures of an external call or a local resource.
///
/// None of these ever escape a pipeline run: the engine turns them into
/// placeholders, apology replies or silent skips.
#[derive(Debug, Error)]
pub enum Error {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Non-success HTTP status from a provider.
    #[error("api error {status}: {body}")]
    Api { status: u16, body: String },

    /// A required API key or endpoint is missing.
    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("request timed out")]
    Timeout,

    #[error("empty response")]
    EmptyResponse,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Classify a reqwest failure, keeping timeouts distinct.
    pub fn from_request(e: reqwest::Error) -> Self {
        if e.is_timeout() { Self::Timeout } else { Self::Http(e) }
    }
}
