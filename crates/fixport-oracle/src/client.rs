//! Chat-completions client implementing the symbol oracle.

use std::time::Duration;

use async_trait::async_trait;
use fixport_core::{OracleAnswer, SymbolOracle};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::OracleConfig;
use crate::error::{OracleError, Result};

const SYSTEM_PROMPT: &str = "You compare C functions across two versions of the same \
project. Given a symbol body from an older release and the corresponding body from the \
development branch before a security fix, decide whether they implement the same logical \
code path. Reply with exactly one word: match, no-match, or unknown.";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Debug, Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

/// [`SymbolOracle`] backed by an OpenAI-compatible endpoint.
pub struct LlmOracle {
    config: OracleConfig,
    http_client: reqwest::Client,
}

impl LlmOracle {
    pub fn new(config: OracleConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(OracleError::NotConfigured);
        }
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("fixport-oracle/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(LlmOracle {
            config,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(OracleConfig::from_env())
    }

    pub fn config(&self) -> &OracleConfig {
        &self.config
    }

    /// One round trip; the raw reply text.
    pub async fn ask(&self, candidate: &str, target: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.config.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt(candidate, target),
                },
            ],
        };

        let mut builder = self
            .http_client
            .post(self.config.completions_url())
            .json(&request);
        if let Some(key) = &self.config.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: ChatResponse = serde_json::from_str(&response.text().await?)?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OracleError::Malformed("no choices in response".to_string()))
    }
}

#[async_trait]
impl SymbolOracle for LlmOracle {
    async fn classify(&self, candidate: &str, target: &str) -> OracleAnswer {
        match self.ask(candidate, target).await {
            Ok(reply) => {
                let answer = parse_answer(&reply);
                debug!(answer = answer.as_str(), "oracle replied");
                answer
            }
            Err(e) => {
                warn!(error = %e, "oracle unavailable, answering unknown");
                OracleAnswer::Unknown
            }
        }
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

fn user_prompt(candidate: &str, target: &str) -> String {
    format!(
        "Older release:\n```c\n{candidate}```\n\nDevelopment branch (before the fix):\n```c\n{target}```\n\nSame logical code path?"
    )
}

/// Read a one-word verdict out of a model reply.
///
/// Only a reply whose first word is unambiguously `match` or `no-match`
/// counts; anything else, including hedged prose, is `unknown`.
pub fn parse_answer(reply: &str) -> OracleAnswer {
    let first = reply
        .trim()
        .trim_start_matches(['`', '*', '"', '\''])
        .split(|c: char| c.is_whitespace() || matches!(c, '.' | ',' | '!' | ':' | '`' | '*' | '"'))
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    match first.as_str() {
        "match" | "yes" => OracleAnswer::Match,
        "no-match" | "no_match" | "nomatch" | "no" => OracleAnswer::NoMatch,
        _ => OracleAnswer::Unknown,
    }
}
