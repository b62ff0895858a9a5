//! Error types for fixport-oracle

use thiserror::Error;

/// Errors raised while talking to the completion endpoint.
///
/// None of these reach the probe: [`crate::LlmOracle`] turns every failure
/// into an `unknown` answer.
#[derive(Error, Debug)]
pub enum OracleError {
    /// Endpoint not configured
    #[error("oracle endpoint is not configured")]
    NotConfigured,

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success status from the endpoint
    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Response body had no usable answer
    #[error("malformed completion: {0}")]
    Malformed(String),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<reqwest::Error> for OracleError {
    fn from(err: reqwest::Error) -> Self {
        OracleError::Http(err.to_string())
    }
}

/// Result type for oracle operations
pub type Result<T> = std::result::Result<T, OracleError>;
