//! Configuration parsing and validation for consultr.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;
use std::time::Duration;

use crate::provider::ProviderId;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Database configuration for the durable cache tier.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    "./consultr.db".to_string()
}

/// Resilience and dispatch settings.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    /// Consecutive failures that trip a provider's circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before admitting a probe.
    #[serde(default = "default_recovery_timeout_secs")]
    pub recovery_timeout_secs: u64,
    /// Upper bound on concurrent provider calls across all requests.
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    /// Overall deadline for one consultation, in seconds.
    #[serde(default = "default_total_timeout_secs")]
    pub total_timeout_secs: f64,
    /// Allow fanning out to several providers at once.
    #[serde(default = "default_true")]
    pub parallel_enabled: bool,
    /// How long an availability snapshot is reused.
    #[serde(default = "default_availability_ttl_secs")]
    pub availability_ttl_secs: u64,
    /// A failure this recent halves a provider's adaptive score.
    #[serde(default = "default_recent_failure_window_secs")]
    pub recent_failure_window_secs: u64,
}

/// One day.
pub const MAX_TOTAL_TIMEOUT_SECS: f64 = 86_400.0;
/// Ten years.
pub const MAX_TTL_HOURS: f64 = 87_600.0;

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout_secs() -> u64 {
    60
}

fn default_max_concurrent_calls() -> usize {
    10
}

fn default_total_timeout_secs() -> f64 {
    60.0
}

fn default_availability_ttl_secs() -> u64 {
    30
}

fn default_recent_failure_window_secs() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout_secs(),
            max_concurrent_calls: default_max_concurrent_calls(),
            total_timeout_secs: default_total_timeout_secs(),
            parallel_enabled: true,
            availability_ttl_secs: default_availability_ttl_secs(),
            recent_failure_window_secs: default_recent_failure_window_secs(),
        }
    }
}

impl RouterConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    pub fn total_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.total_timeout_secs)
    }

    pub fn availability_ttl(&self) -> Duration {
        Duration::from_secs(self.availability_ttl_secs)
    }

    pub fn recent_failure_window(&self) -> Duration {
        Duration::from_secs(self.recent_failure_window_secs)
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Maximum age of a cache entry, in hours.
    #[serde(default = "default_ttl_hours")]
    pub ttl_hours: f64,
    /// Capacity of the in-memory tier.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Period of the background expiry sweep.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_hours() -> f64 {
    48.0
}

fn default_max_entries() -> usize {
    20_000
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_hours: default_ttl_hours(),
            max_entries: default_max_entries(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs_f64(self.ttl_hours * 3600.0)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// API key wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
#[derive(Clone)]
pub struct ApiKey(SecretString);

impl ApiKey {
    /// Access the raw key value. Every call site is auditable via `grep expose_secret`.
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for ApiKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for ApiKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| ApiKey(SecretString::from(s)))
    }
}

impl From<String> for ApiKey {
    fn from(s: String) -> Self {
        ApiKey(SecretString::from(s))
    }
}

impl From<&str> for ApiKey {
    fn from(s: &str) -> Self {
        ApiKey(SecretString::from(s))
    }
}

/// How a provider's API key was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Key was a literal string in config (no ${} references)
    Literal,
    /// Key contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Key was auto-discovered from convention env var (holds var name)
    Convention(String),
    /// No key available
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

/// Backends that are configured, keyed by their fixed provider id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProvidersConfig {
    pub gemini: Option<CommandProviderConfig>,
    pub llama: Option<OllamaProviderConfig>,
}

impl ProvidersConfig {
    pub fn is_empty(&self) -> bool {
        self.gemini.is_none() && self.llama.is_none()
    }
}

/// Command-line provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandProviderConfig {
    /// Executable name or path
    #[serde(default = "default_command")]
    pub command: String,
    /// Arguments placed before the prompt. `{model}` is substituted.
    #[serde(default = "default_command_args")]
    pub args: Vec<String>,
    #[serde(default = "default_command_model")]
    pub model: String,
    #[serde(default = "default_command_fallbacks")]
    pub fallback_models: Vec<String>,
    /// Optional API key exported to the child process
    pub api_key: Option<ApiKey>,
    /// Environment variable the key is exported as
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_command_rpm")]
    pub requests_per_minute: u32,
}

fn default_command() -> String {
    "gemini".to_string()
}

fn default_command_args() -> Vec<String> {
    vec!["-m".to_string(), "{model}".to_string(), "-p".to_string()]
}

fn default_command_model() -> String {
    "gemini-2.5-pro".to_string()
}

fn default_command_fallbacks() -> Vec<String> {
    vec!["gemini-2.5-flash".to_string()]
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_command_rpm() -> u32 {
    10
}

impl Default for CommandProviderConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            args: default_command_args(),
            model: default_command_model(),
            fallback_models: default_command_fallbacks(),
            api_key: None,
            api_key_env: default_api_key_env(),
            requests_per_minute: default_command_rpm(),
        }
    }
}

/// Local model server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaProviderConfig {
    #[serde(default = "default_ollama_url")]
    pub url: String,
    #[serde(default = "default_ollama_model")]
    pub model: String,
    #[serde(default)]
    pub fallback_models: Vec<String>,
    #[serde(default = "default_ollama_rpm")]
    pub requests_per_minute: u32,
    /// Timeout for the liveness probe, in seconds
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_ollama_model() -> String {
    "llama2:7b".to_string()
}

fn default_ollama_rpm() -> u32 {
    30
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl Default for OllamaProviderConfig {
    fn default() -> Self {
        Self {
            url: default_ollama_url(),
            model: default_ollama_model(),
            fallback_models: Vec::new(),
            requests_per_minute: default_ollama_rpm(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = read_file(path.as_ref())?;
        Self::parse_str(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// Returns the config and per-provider key source information.
    pub fn from_file_with_env(
        path: impl AsRef<Path>,
    ) -> Result<(Self, Vec<(ProviderId, KeySource)>), ConfigError> {
        let content = read_file(path.as_ref())?;
        Self::parse_str_with_env(&content)
    }

    /// Parse a TOML string and resolve API keys from the process environment.
    pub fn parse_str_with_env(
        content: &str,
    ) -> Result<(Self, Vec<(ProviderId, KeySource)>), ConfigError> {
        let mut config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        let sources = config.resolve_keys_with(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok((config, sources))
    }

    /// Resolve provider API keys using a custom lookup function.
    ///
    /// - key containing `${VAR}`: expanded, source = `EnvExpanded`
    /// - literal key: kept, source = `Literal`
    /// - no key: convention lookup (`CONSULTR_<ID>_API_KEY`), source =
    ///   `Convention(var_name)` or `KeySource::None`
    pub fn resolve_keys_with<F>(
        &mut self,
        lookup: F,
    ) -> Result<Vec<(ProviderId, KeySource)>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut sources = Vec::new();

        if let Some(gemini) = self.providers.gemini.as_mut() {
            let id = ProviderId::Gemini;
            let (key, source) = match gemini.api_key.take() {
                Some(raw) if raw.expose_secret().contains("${") => {
                    let expanded =
                        expand_env_vars_with(raw.expose_secret(), id.as_str(), &lookup)?;
                    (Some(ApiKey::from(expanded)), KeySource::EnvExpanded)
                }
                Some(raw) => (Some(raw), KeySource::Literal),
                None => {
                    let var_name = convention_env_var_name(id.as_str());
                    match lookup(&var_name) {
                        Some(value) => (Some(ApiKey::from(value)), KeySource::Convention(var_name)),
                        None => (None, KeySource::None),
                    }
                }
            };
            gemini.api_key = key;
            sources.push((id, source));
        }

        if self.providers.llama.is_some() {
            sources.push((ProviderId::Llama, KeySource::None));
        }

        Ok(sources)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            tracing::warn!("No providers configured - every consultation will fail");
        }

        if self.router.failure_threshold == 0 {
            return Err(ConfigError::Validation(
                "router.failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.router.max_concurrent_calls == 0 {
            return Err(ConfigError::Validation(
                "router.max_concurrent_calls must be at least 1".to_string(),
            ));
        }
        if !(self.router.total_timeout_secs > 0.0
            && self.router.total_timeout_secs <= MAX_TOTAL_TIMEOUT_SECS)
        {
            return Err(ConfigError::Validation(format!(
                "router.total_timeout_secs must be in (0, {}]",
                MAX_TOTAL_TIMEOUT_SECS
            )));
        }
        if !(self.cache.ttl_hours > 0.0 && self.cache.ttl_hours <= MAX_TTL_HOURS) {
            return Err(ConfigError::Validation(format!(
                "cache.ttl_hours must be in (0, {}]",
                MAX_TTL_HOURS
            )));
        }
        if self.cache.max_entries == 0 {
            return Err(ConfigError::Validation(
                "cache.max_entries must be at least 1".to_string(),
            ));
        }
        if self.cache.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "cache.sweep_interval_secs must be at least 1".to_string(),
            ));
        }

        if let Some(gemini) = &self.providers.gemini {
            if gemini.command.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Provider 'gemini' has empty command".to_string(),
                ));
            }
            if gemini.requests_per_minute == 0 {
                return Err(ConfigError::Validation(
                    "Provider 'gemini' requests_per_minute must be at least 1".to_string(),
                ));
            }
        }

        if let Some(llama) = &self.providers.llama {
            if llama.url.trim().is_empty() {
                return Err(ConfigError::Validation(
                    "Provider 'llama' has empty URL".to_string(),
                ));
            }
            if llama.requests_per_minute == 0 {
                return Err(ConfigError::Validation(
                    "Provider 'llama' requests_per_minute must be at least 1".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for provider '{provider}': {message}")]
    EnvVar {
        var: String,
        provider: String,
        message: String,
    },
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports multiple `${VAR}` in one string. Fails on first missing variable,
/// unclosed `${`, or empty variable name.
fn expand_env_vars_with<F>(
    input: &str,
    provider_name: &str,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            provider: provider_name.to_string(),
            message: "Unclosed '${' in api_key value".to_string(),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                provider: provider_name.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            provider: provider_name.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in provider '{}')",
                var_name, provider_name
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

/// Derive the convention-based env var name for a provider.
///
/// - "gemini" -> "CONSULTR_GEMINI_API_KEY"
/// - "my-backend" -> "CONSULTR_MY_BACKEND_API_KEY"
pub fn convention_env_var_name(provider_name: &str) -> String {
    let upper_snake = provider_name.to_uppercase().replace(['-', ' '], "_");
    format!("CONSULTR_{}_API_KEY", upper_snake)
}
