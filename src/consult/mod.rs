//! Consultation routing.
//!
//! [`ConsultRouter`] owns every piece of shared per-process state (provider
//! registry, circuit breakers, rate windows, stats, cache) and exposes the
//! single `consult` operation plus the operational hooks used by the HTTP
//! layer and the CLI.

pub mod circuit_breaker;
mod orchestrator;
pub mod rate_limit;
pub mod summary;
mod sweeper;
pub mod types;

pub use circuit_breaker::{
    BreakerSettings, CircuitBreakerRegistry, CircuitOpenError, CircuitSnapshot, CircuitState,
    PermitType, ProbeGuard,
};
pub use orchestrator::{adaptive_timeout, MAX_CALL_TIMEOUT, MIN_CALL_TIMEOUT};
pub use rate_limit::RateLimiter;
pub use types::{ConsultationRequest, ConsultationResult, ProviderOutcome};

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use self::orchestrator::{DispatchPlan, Orchestrator};
use self::sweeper::Sweeper;
use crate::cache::{CacheEntry, ResponseCache, SweepReport};
use crate::config::{Config, RouterConfig};
use crate::error::{Error, Result};
use crate::provider::{CommandProvider, OllamaProvider, Provider, ProviderId};
use crate::router::{
    Availability, AvailabilityCache, Classification, PatternStats, ProviderSelector,
    ProviderStats, QueryCategory, QueryClassifier, RequestTotals, StatsTracker,
};

/// A backend plus its per-minute request allowance.
pub struct RegisteredProvider {
    pub provider: Arc<dyn Provider>,
    pub requests_per_minute: u32,
}

impl RegisteredProvider {
    pub fn new(provider: Arc<dyn Provider>, requests_per_minute: u32) -> Self {
        Self {
            provider,
            requests_per_minute,
        }
    }
}

/// Tunables for routing and dispatch.
#[derive(Debug, Clone)]
pub struct RouterSettings {
    pub breaker: BreakerSettings,
    pub max_concurrent_calls: usize,
    pub total_timeout: Duration,
    pub parallel_enabled: bool,
    pub availability_ttl: Duration,
    pub recent_failure_window: Duration,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self::from(&RouterConfig::default())
    }
}

impl From<&RouterConfig> for RouterSettings {
    fn from(config: &RouterConfig) -> Self {
        Self {
            breaker: BreakerSettings {
                failure_threshold: config.failure_threshold,
                recovery_timeout: config.recovery_timeout(),
            },
            max_concurrent_calls: config.max_concurrent_calls.max(1),
            total_timeout: config.total_timeout(),
            parallel_enabled: config.parallel_enabled,
            availability_ttl: config.availability_ttl(),
            recent_failure_window: config.recent_failure_window(),
        }
    }
}

/// Per-provider line of the status report.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub provider: ProviderId,
    /// Last probed liveness, if a probe has run.
    pub available: Option<bool>,
    pub requests_per_minute: Option<u32>,
    pub circuit: Option<CircuitSnapshot>,
    pub stats: ProviderStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStatus {
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_secs: u64,
    pub durable: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternStatus {
    pub category: QueryCategory,
    #[serde(flatten)]
    pub stats: PatternStats,
}

/// Everything the status endpoint reports.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub providers: Vec<ProviderStatus>,
    pub cache: Option<CacheStatus>,
    pub patterns: Vec<PatternStatus>,
    pub totals: RequestTotals,
}

/// The consultation router context.
pub struct ConsultRouter {
    providers: BTreeMap<ProviderId, Arc<dyn Provider>>,
    classifier: QueryClassifier,
    selector: ProviderSelector,
    availability: AvailabilityCache,
    stats: StatsTracker,
    breakers: CircuitBreakerRegistry,
    limiter: RateLimiter,
    cache: Option<Arc<ResponseCache>>,
    permits: Semaphore,
    settings: RouterSettings,
    sweeper: Mutex<Option<Sweeper>>,
}

impl ConsultRouter {
    /// Build a router over `providers`. Passing `None` for `cache` disables
    /// response caching entirely.
    pub fn new(
        providers: Vec<RegisteredProvider>,
        settings: RouterSettings,
        cache: Option<Arc<ResponseCache>>,
    ) -> Self {
        let limits: Vec<(ProviderId, u32)> = providers
            .iter()
            .map(|p| (p.provider.id(), p.requests_per_minute))
            .collect();
        let providers: BTreeMap<ProviderId, Arc<dyn Provider>> = providers
            .into_iter()
            .map(|p| (p.provider.id(), p.provider))
            .collect();
        let ids: Vec<ProviderId> = providers.keys().copied().collect();

        Self {
            classifier: QueryClassifier::new(),
            selector: ProviderSelector::new(settings.recent_failure_window),
            availability: AvailabilityCache::new(settings.availability_ttl),
            stats: StatsTracker::new(),
            breakers: CircuitBreakerRegistry::new(&ids, settings.breaker),
            limiter: RateLimiter::new(limits),
            permits: Semaphore::new(settings.max_concurrent_calls.max(1)),
            cache,
            providers,
            settings,
            sweeper: Mutex::new(None),
        }
    }

    /// Build the router described by a configuration file: concrete
    /// providers, and the cache with its durable tier when a database is
    /// configured.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let mut providers = Vec::new();

        if let Some(gemini) = &config.providers.gemini {
            providers.push(RegisteredProvider::new(
                Arc::new(CommandProvider::from_config(ProviderId::Gemini, gemini)),
                gemini.requests_per_minute,
            ));
        }

        if let Some(llama) = &config.providers.llama {
            let client = reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
            providers.push(RegisteredProvider::new(
                Arc::new(OllamaProvider::from_config(ProviderId::Llama, llama, client)),
                llama.requests_per_minute,
            ));
        }

        let cache = if config.cache.enabled {
            let store = match &config.database {
                Some(db) => {
                    let pool = crate::storage::init_pool(&db.path).await?;
                    tracing::info!(path = %db.path, "Durable cache tier enabled");
                    Some(pool)
                }
                None => None,
            };
            Some(Arc::new(ResponseCache::from_config(&config.cache, store)))
        } else {
            None
        };

        Ok(Self::new(providers, RouterSettings::from(&config.router), cache))
    }

    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }

    /// Registered provider ids, in enumeration order.
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.keys().copied().collect()
    }

    pub fn stats(&self) -> &StatsTracker {
        &self.stats
    }

    pub fn circuit_breakers(&self) -> &CircuitBreakerRegistry {
        &self.breakers
    }

    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    /// Current availability of every registered provider.
    pub async fn availability(&self) -> Availability {
        let providers: Vec<Arc<dyn Provider>> = self.providers.values().cloned().collect();
        self.availability.snapshot(&providers).await
    }

    /// Answer one request.
    ///
    /// Provider-level failures never surface as `Err`: they are reported in
    /// the returned result. `Err` is only returned for invalid input.
    pub async fn consult(&self, request: ConsultationRequest) -> Result<ConsultationResult> {
        if request.query.trim().is_empty() {
            return Err(Error::BadRequest("query must not be empty".to_string()));
        }

        let started = Instant::now();
        let request_id = uuid::Uuid::new_v4().to_string();
        let classification = self.classifier.classify(&request.query);
        let category = classification.category;
        let query_hash = request.query_hash();

        tracing::info!(
            request_id = %request_id,
            category = %category,
            confidence = classification.confidence,
            provider = %request.provider,
            compare = request.compare,
            "Consultation received"
        );

        let cache = self.cache.as_deref().filter(|_| request.use_cache);

        if let Some(cache) = cache {
            if let Some(entry) = cache.get_by_hash(&query_hash).await {
                tracing::info!(
                    request_id = %request_id,
                    query_hash = %query_hash,
                    hit_count = entry.hit_count,
                    "Cache hit"
                );
                let elapsed = started.elapsed();
                self.stats.record_request(category, elapsed, true, true);
                return Ok(self.cached_result(
                    request_id,
                    classification,
                    query_hash,
                    entry,
                    elapsed,
                ));
            }
        }

        let availability = self.availability().await;
        let selected = self.selector.select(
            request.provider,
            request.compare,
            category,
            &availability,
            &self.stats,
        );

        if selected.is_empty() {
            let elapsed = started.elapsed();
            self.stats.record_request(category, elapsed, false, false);
            tracing::warn!(request_id = %request_id, ?availability, "No provider available");
            return Ok(failed_result(
                request_id,
                classification,
                query_hash,
                Error::NoProviderAvailable,
                Vec::new(),
                elapsed,
            ));
        }

        let profile = category.profile();
        let plan = DispatchPlan {
            query: &request.query,
            context: &request.context,
            selected: &selected,
            exhaustive: request.compare,
            parallel: self.settings.parallel_enabled
                && profile.parallel_allowed
                && selected.len() >= 2,
            call_timeout: adaptive_timeout(
                self.settings.total_timeout,
                &request.query,
                profile.timeout_multiplier,
            ),
            deadline: started + self.settings.total_timeout,
        };
        let outcomes = self.orchestrator().dispatch(&plan).await;
        let elapsed = started.elapsed();

        let Some(first) = outcomes.iter().position(|o| o.success) else {
            self.stats.record_request(category, elapsed, false, false);
            let err = Error::AllProvidersFailed {
                attempted: outcomes.len(),
            };
            tracing::warn!(request_id = %request_id, error = %err, "Consultation failed");
            return Ok(failed_result(
                request_id,
                classification,
                query_hash,
                err,
                outcomes,
                elapsed,
            ));
        };

        if let Some(cache) = cache {
            let first = &outcomes[first];
            let entry = CacheEntry::new(
                query_hash.clone(),
                first.response.clone().unwrap_or_default(),
                first.provider,
                first.model_id.clone().unwrap_or_default(),
            );
            cache.insert(entry).await;
        }

        self.stats.record_request(category, elapsed, false, true);

        let summary = summary::summarize(&outcomes, category, profile.synthesis_enabled);
        let comparison = if request.compare {
            summary::compare(&outcomes)
        } else {
            None
        };
        let providers_used: Vec<ProviderId> = outcomes
            .iter()
            .filter(|o| o.success)
            .map(|o| o.provider)
            .collect();

        tracing::info!(
            request_id = %request_id,
            providers = ?providers_used,
            elapsed_ms = elapsed.as_millis() as u64,
            "Consultation succeeded"
        );

        Ok(ConsultationResult {
            request_id,
            success: true,
            cache_hit: false,
            hit_count: None,
            category,
            confidence: classification.confidence,
            query_hash,
            providers_used,
            responses: outcomes,
            summary,
            comparison,
            error: None,
            error_kind: None,
            elapsed_ms: elapsed.as_millis() as u64,
        })
    }

    fn orchestrator(&self) -> Orchestrator<'_> {
        Orchestrator {
            providers: &self.providers,
            limiter: &self.limiter,
            breakers: &self.breakers,
            stats: &self.stats,
            permits: &self.permits,
        }
    }

    fn cached_result(
        &self,
        request_id: String,
        classification: Classification,
        query_hash: String,
        entry: CacheEntry,
        elapsed: Duration,
    ) -> ConsultationResult {
        let summary = summary::cached(&entry);
        let elapsed_ms = elapsed.as_millis() as u64;
        ConsultationResult {
            request_id,
            success: true,
            cache_hit: true,
            hit_count: Some(entry.hit_count),
            category: classification.category,
            confidence: classification.confidence,
            query_hash,
            providers_used: vec![entry.provider],
            responses: vec![ProviderOutcome::succeeded(
                entry.provider,
                entry.response,
                entry.model_id,
                elapsed_ms,
            )],
            summary,
            comparison: None,
            error: None,
            error_kind: None,
            elapsed_ms,
        }
    }

    /// Force a provider's circuit Closed. Returns false if the provider is
    /// not registered.
    pub fn reset_circuit(&self, provider: ProviderId) -> bool {
        self.breakers.reset(provider)
    }

    /// Run the expiry sweep now.
    pub async fn sweep_cache(&self) -> SweepReport {
        match &self.cache {
            Some(cache) => cache.clear_expired().await,
            None => SweepReport::default(),
        }
    }

    pub async fn status(&self) -> RouterStatus {
        let availability = self.availability.cached().await;
        let circuits: BTreeMap<ProviderId, CircuitSnapshot> = self
            .breakers
            .all_states()
            .into_iter()
            .map(|s| (s.provider, s))
            .collect();

        let providers = self
            .providers
            .keys()
            .map(|id| ProviderStatus {
                provider: *id,
                available: availability.as_ref().and_then(|a| a.get(id).copied()),
                requests_per_minute: self.limiter.limit(*id),
                circuit: circuits.get(id).cloned(),
                stats: self.stats.provider(*id),
            })
            .collect();

        let cache = self.cache.as_ref().map(|c| CacheStatus {
            entries: c.len(),
            max_entries: c.max_entries(),
            ttl_secs: c.ttl().as_secs(),
            durable: c.has_durable_tier(),
        });

        let patterns = self
            .stats
            .patterns()
            .into_iter()
            .map(|(category, stats)| PatternStatus { category, stats })
            .collect();

        RouterStatus {
            providers,
            cache,
            patterns,
            totals: self.stats.totals(),
        }
    }

    /// Start the periodic cache sweep. No-op without a cache or when
    /// already running.
    pub fn start_background(&self, sweep_interval: Duration) {
        let Some(cache) = &self.cache else {
            return;
        };
        let mut sweeper = self.sweeper.lock().unwrap();
        if sweeper.is_none() {
            tracing::debug!(interval_secs = sweep_interval.as_secs(), "Starting cache sweeper");
            *sweeper = Some(Sweeper::spawn(cache.clone(), sweep_interval));
        }
    }

    /// Stop background work and wait for it to finish.
    pub async fn shutdown(&self) {
        let sweeper = self.sweeper.lock().unwrap().take();
        if let Some(sweeper) = sweeper {
            sweeper.stop().await;
        }
    }

    pub fn is_background_running(&self) -> bool {
        self.sweeper.lock().unwrap().is_some()
    }
}

fn failed_result(
    request_id: String,
    classification: Classification,
    query_hash: String,
    error: Error,
    responses: Vec<ProviderOutcome>,
    elapsed: Duration,
) -> ConsultationResult {
    let message = error.to_string();
    ConsultationResult {
        request_id,
        success: false,
        cache_hit: false,
        hit_count: None,
        category: classification.category,
        confidence: classification.confidence,
        query_hash,
        providers_used: Vec::new(),
        responses,
        summary: summary::failure(&message),
        comparison: None,
        error: Some(message),
        error_kind: Some(error.kind()),
        elapsed_ms: elapsed.as_millis() as u64,
    }
}
