//! fixport-oracle: ask a language model whether two code bodies are the
//! same logical symbol.
//!
//! [`LlmOracle`] implements [`fixport_core::SymbolOracle`] over any
//! OpenAI-compatible `/chat/completions` endpoint. It is advisory only and
//! answers `unknown` whenever the endpoint cannot be reached or its reply
//! cannot be read.

pub mod client;
pub mod config;
pub mod error;

pub use client::{parse_answer, LlmOracle};
pub use config::OracleConfig;
pub use error::{OracleError, Result};
