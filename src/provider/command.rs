//! Command-line backed provider.
//!
//! Runs a CLI client once per attempt, passing the prompt as the final
//! argument and reading the answer from stdout.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use super::{build_prompt, Provider, ProviderError, ProviderId, ProviderResponse};
use crate::config::{ApiKey, CommandProviderConfig};

/// Placeholder in configured args replaced by the model name.
const MODEL_PLACEHOLDER: &str = "{model}";

/// Provider that shells out to a hosted-model CLI.
pub struct CommandProvider {
    id: ProviderId,
    command: String,
    args: Vec<String>,
    models: Vec<String>,
    api_key: Option<ApiKey>,
    api_key_env: String,
}

impl CommandProvider {
    pub fn from_config(id: ProviderId, config: &CommandProviderConfig) -> Self {
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
            command: config.command.clone(),
            args: config.args.clone(),
            models,
            api_key: config.api_key.clone(),
            api_key_env: config.api_key_env.clone(),
        }
    }

    /// Models tried in order: primary first, then fallbacks.
    pub fn models(&self) -> &[String] {
        &self.models
    }

    async fn run_model(
        &self,
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, ProviderError> {
        let mut cmd = Command::new(&self.command);
        cmd.args(self.args.iter().map(|a| a.replace(MODEL_PLACEHOLDER, model)))
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(key) = &self.api_key {
            cmd.env(&self.api_key_env, key.expose_secret());
        }

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                ProviderError::Failed(format!(
                    "'{}' timed out after {:.1}s",
                    self.command,
                    timeout.as_secs_f64()
                ))
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::Failed(format!(
                "'{}' exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if text.is_empty() {
            return Err(ProviderError::EmptyResponse);
        }
        Ok(text)
    }
}

#[async_trait]
impl Provider for CommandProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn is_available(&self) -> bool {
        resolve_command(&self.command).await.is_some()
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
            match self.run_model(model, &prompt, timeout).await {
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

/// Resolve a command to an existing file, either directly or via `PATH`.
async fn resolve_command(command: &str) -> Option<PathBuf> {
    if command.contains(std::path::MAIN_SEPARATOR) {
        let path = Path::new(command);
        return is_file(path).await.then(|| path.to_path_buf());
    }

    let search = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&search) {
        let candidate = dir.join(command);
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }
    None
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
