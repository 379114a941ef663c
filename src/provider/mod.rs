//! Backend provider abstraction.
//!
//! The router only ever talks to a backend through [`Provider`]. Transport
//! details (subprocesses, HTTP, credentials) stay inside the concrete
//! implementations in this module.

mod command;
mod ollama;

pub use command::CommandProvider;
pub use ollama::OllamaProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Closed set of backends the router knows how to score and dispatch to.
///
/// Declaration order is the enumeration order used for deterministic
/// tie-breaking during selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Hosted model reached through a command-line client. Structured answers.
    Gemini,
    /// Local model server reached over HTTP. Conversational answers.
    Llama,
}

impl ProviderId {
    /// All provider ids in enumeration order.
    pub const ALL: [ProviderId; 2] = [ProviderId::Gemini, ProviderId::Llama];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "gemini",
            ProviderId::Llama => "llama",
        }
    }

    /// Capitalized name for human-readable summaries.
    pub fn display_name(&self) -> &'static str {
        match self {
            ProviderId::Gemini => "Gemini",
            ProviderId::Llama => "Llama",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderId {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(ProviderId::Gemini),
            "llama" | "llama2" => Ok(ProviderId::Llama),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

/// Error returned when a string does not name a known provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown provider '{0}'")]
pub struct UnknownProvider(pub String);

/// A successful backend answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderResponse {
    pub text: String,
    /// Model that actually produced the answer (after any model fallback).
    pub model_id: String,
}

/// Failure reported by a backend implementation.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("Provider returned an empty response")]
    EmptyResponse,

    #[error("Failed to start provider process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Provider HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Failed(String),
}

/// Narrow capability the router consumes. Implemented once per backend.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable identity of this backend.
    fn id(&self) -> ProviderId;

    /// Cheap liveness probe.
    async fn is_available(&self) -> bool;

    /// Ask the backend. `timeout` is the budget the router will allow; the
    /// router enforces it independently, so implementations may use it to
    /// bound their own internal attempts.
    async fn invoke(
        &self,
        query: &str,
        context: &str,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError>;
}

/// Join context and query into the text handed to a backend.
pub(crate) fn build_prompt(query: &str, context: &str) -> String {
    let context = context.trim();
    if context.is_empty() {
        query.trim().to_string()
    } else {
        format!("Context:\n{}\n\nQuestion:\n{}", context, query.trim())
    }
}
