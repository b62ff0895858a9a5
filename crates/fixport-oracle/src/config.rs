//! Oracle endpoint configuration.

use serde::{Deserialize, Serialize};

/// Default request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Where and how to reach an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OracleConfig {
    /// Base URL; `/chat/completions` is appended.
    pub endpoint: String,
    pub model: String,
    /// Bearer token (optional for local endpoints)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig {
            endpoint: std::env::var("FIXPORT_ORACLE_ENDPOINT")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            model: std::env::var("FIXPORT_ORACLE_MODEL")
                .unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            api_key: std::env::var("FIXPORT_ORACLE_API_KEY").ok(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl OracleConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn new(endpoint: &str, model: &str) -> Self {
        OracleConfig {
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            api_key: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    pub fn with_api_key(mut self, key: &str) -> Self {
        self.api_key = Some(key.to_string());
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Full URL of the completions route.
    pub fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint.trim_end_matches('/'))
    }
}
