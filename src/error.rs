//! Typed errors surfaced at the judge API boundary

use thiserror::Error;

/// Errors raised while talking to the judge API or decoding its payloads
#[derive(Debug, Error)]
pub enum ApiError {
    /// The coordinator could not be reached (refused, reset, connect timeout)
    #[error("failed to connect to judge API: {0}")]
    Connect(String),

    /// The request failed for a reason other than connectivity
    #[error("judge API request failed: {0}")]
    Request(String),

    /// A response body could not be decoded into the expected shape
    #[error("failed to decode judge API response: {0}")]
    Decode(#[from] serde_json::Error),

    /// A language identifier is not in the language table
    #[error("language {0} not supported")]
    UnknownLanguage(String),
}

impl ApiError {
    /// Whether the transport layer should retry after this error
    pub fn is_connect(&self) -> bool {
        matches!(self, ApiError::Connect(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        // Send failures (refused, reset) count as connectivity; builder and body errors do not
        if err.is_connect() || err.is_request() {
            ApiError::Connect(err.to_string())
        } else {
            ApiError::Request(err.to_string())
        }
    }
}
