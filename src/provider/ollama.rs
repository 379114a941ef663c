//! HTTP provider for a local Ollama-compatible model server.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{build_prompt, Provider, ProviderError, ProviderId, ProviderResponse};
use crate::config::OllamaProviderConfig;

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

/// Provider backed by a local model server speaking the Ollama HTTP API.
pub struct OllamaProvider {
    id: ProviderId,
    base_url: String,
    models: Vec<String>,
    probe_timeout: Duration,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn from_config(
        id: ProviderId,
        config: &OllamaProviderConfig,
        client: reqwest::Client,
    ) -> Self {
        let mut models = vec![config.model.clone()];
        models.extend(
            config
                .fallback_models
                .iter()
                .filter(|m| **m != config.model)
                .cloned(),
        );

        Self {
            id,
            base_url: config.url.trim_end_matches('/').to_string(),
            models,
            probe_timeout: Duration::from_secs(config.probe_timeout_secs),
            client,
        }
    }

    async fn generate(
        &self,
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .timeout(timeout)
            .json(&GenerateRequest {
                model,
                prompt,
                stream: false,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Failed(format!(
                "model server returned {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let body: GenerateResponse = response.json().await?;
        let text = body.response.trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn is_available(&self) -> bool {
        match self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!(provider = %self.id, error = %e, "Availability probe failed");
                false
            }
        }
    }

    async fn invoke(
        &self,
        query: &str,
        context: &str,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        let prompt = build_prompt(query, context);
        let mut last_error = None;

        for model in &self.models {
            match self.generate(model, &prompt, timeout).await {
                Ok(text) => {
                    return Ok(ProviderResponse {
                        text,
                        model_id: model.clone(),
                    })
                }
                Err(e) => {
                    tracing::debug!(
                        provider = %self.id,
                        model = %model,
                        error = %e,
                        "Model attempt failed, trying next model"
                    );
                    last_error = Some(e);
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| ProviderError::Failed("no models configured".to_string())))
    }
}
