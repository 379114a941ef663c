//! Request and result types for consultations.

use serde::{Deserialize, Serialize};

use crate::cache::query_hash;
use crate::error::ErrorKind;
use crate::provider::ProviderId;
use crate::router::{ProviderPreference, QueryCategory};

fn default_true() -> bool {
    true
}

/// One question for the router.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConsultationRequest {
    pub query: String,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub provider: ProviderPreference,
    /// Ask every available provider and contrast their answers.
    #[serde(default)]
    pub compare: bool,
    #[serde(default = "default_true")]
    pub use_cache: bool,
}

impl ConsultationRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            context: String::new(),
            provider: ProviderPreference::Auto,
            compare: false,
            use_cache: true,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }

    pub fn with_provider(mut self, provider: ProviderPreference) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_compare(mut self, compare: bool) -> Self {
        self.compare = compare;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    /// Cache key for this request's query and context.
    pub fn query_hash(&self) -> String {
        query_hash(&self.query, &self.context)
    }
}

/// What happened when one provider was attempted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProviderOutcome {
    pub provider: ProviderId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ProviderOutcome {
    pub fn succeeded(
        provider: ProviderId,
        response: String,
        model_id: String,
        latency_ms: u64,
    ) -> Self {
        Self {
            provider,
            success: true,
            response: Some(response),
            model_id: Some(model_id),
            latency_ms,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(provider: ProviderId, error: &crate::error::Error, latency_ms: u64) -> Self {
        Self {
            provider,
            success: false,
            response: None,
            model_id: None,
            latency_ms,
            error: Some(error.to_string()),
            error_kind: Some(error.kind()),
        }
    }

    pub fn latency_secs(&self) -> f64 {
        self.latency_ms as f64 / 1000.0
    }
}

/// Aggregated answer to one consultation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsultationResult {
    pub request_id: String,
    pub success: bool,
    pub cache_hit: bool,
    /// Hit counter of the cache entry that served this result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hit_count: Option<u32>,
    pub category: QueryCategory,
    pub confidence: f64,
    pub query_hash: String,
    pub providers_used: Vec<ProviderId>,
    /// Per-provider outcomes in selection order.
    pub responses: Vec<ProviderOutcome>,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults_from_json() {
        let req: ConsultationRequest =
            serde_json::from_str(r#"{"query": "What is Rust?"}"#).unwrap();
        assert_eq!(req, ConsultationRequest::new("What is Rust?"));
        assert!(req.use_cache);
        assert_eq!(req.provider, ProviderPreference::Auto);
    }

    #[test]
    fn test_request_provider_field() {
        let json = r#"{"query": "q", "provider": "llama2", "compare": true}"#;
        let req: ConsultationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(req.provider, ProviderPreference::Specific(ProviderId::Llama));
        assert!(req.compare);

        let json = r#"{"query": "q", "provider": "gpt"}"#;
        let bad = serde_json::from_str::<ConsultationRequest>(json);
        assert!(bad.is_err());
    }

    #[test]
    fn test_query_hash_ignores_case() {
        let a = ConsultationRequest::new("What is Rust?").with_context("CLI");
        let b = ConsultationRequest::new("  what is rust?").with_context("cli ");
        assert_eq!(a.query_hash(), b.query_hash());
    }

    #[test]
    fn test_failed_outcome_carries_kind() {
        let err = crate::error::Error::NoProviderAvailable;
        let outcome = ProviderOutcome::failed(ProviderId::Gemini, &err, 0);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "no_provider_available");
        assert!(json.get("response").is_none());
    }
}
