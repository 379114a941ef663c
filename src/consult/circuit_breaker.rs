//! Circuit breaker state machine for per-provider health tracking.
//!
//! Implements the Closed -> Open -> Half-Open -> Closed lifecycle:
//! - **Closed**: calls flow normally, consecutive failures are counted
//! - **Open**: calls are rejected until the recovery timeout has passed
//!   since the last failure
//! - **Half-Open**: a single probe call is let through to test recovery;
//!   everyone else is still rejected while it runs
//!
//! This module contains:
//! - Core state machine (`CircuitBreakerInner`)
//! - Concurrent registry (`CircuitBreakerRegistry`) backed by DashMap
//! - RAII `ProbeGuard` to prevent stuck probe_in_flight flags

use dashmap::DashMap;
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::Error;
use crate::provider::ProviderId;

/// The three states of the circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation. Calls flow through, failures are counted.
    Closed,
    /// Circuit tripped. All calls are rejected until recovery.
    Open,
    /// Recovery probe. One call is allowed through to test provider health.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Snapshot of a single provider's circuit breaker state.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitSnapshot {
    pub provider: ProviderId,
    pub state: CircuitState,
    pub failure_count: u32,
    pub trip_count: u32,
    pub last_error: Option<String>,
}

/// Result of checking circuit breaker state for a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckResult {
    /// Circuit is Closed -- call may proceed.
    Allowed,
    /// Caller has been granted the probe permit (single-permit model).
    ProbePermit,
    /// Circuit is Open, or Half-Open with a probe already in flight.
    Rejected,
}

/// Information about the last error recorded against a circuit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastError {
    /// Category of the error (e.g., "timeout", "provider_error").
    pub error_type: String,
    pub message: String,
}

impl std::fmt::Display for LastError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_type, self.message)
    }
}

/// Error returned when a provider's circuit breaker refuses a call.
#[derive(Debug, Clone)]
pub struct CircuitOpenError {
    pub provider: ProviderId,
    /// Why the circuit is open (last error that caused the transition).
    pub reason: String,
    /// How many times this circuit has tripped (cumulative).
    pub trip_count: u32,
}

impl std::fmt::Display for CircuitOpenError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Circuit breaker open for provider '{}': {}",
            self.provider, self.reason
        )
    }
}

impl std::error::Error for CircuitOpenError {}

impl From<CircuitOpenError> for Error {
    fn from(e: CircuitOpenError) -> Self {
        Error::CircuitOpen {
            provider: e.provider,
            reason: e.reason,
        }
    }
}

/// Trip and recovery settings shared by every breaker in a registry.
#[derive(Debug, Clone, Copy)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub recovery_timeout: Duration,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(60),
        }
    }
}

/// Core circuit breaker state machine (not thread-safe on its own).
pub(crate) struct CircuitBreakerInner {
    pub(crate) state: CircuitState,
    /// Consecutive failure count (resets on success).
    pub(crate) failure_count: u32,
    /// When the last failure was recorded. Open-state recovery is measured
    /// from here.
    pub(crate) last_failure_at: Option<Instant>,
    pub(crate) last_error: Option<LastError>,
    /// Total number of times this circuit has tripped open.
    pub(crate) trip_count: u32,
    /// Whether a probe call is currently in flight (Half-Open single-permit).
    pub(crate) probe_in_flight: bool,
}

impl CircuitBreakerInner {
    pub(crate) fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_at: None,
            last_error: None,
            trip_count: 0,
            probe_in_flight: false,
        }
    }

    /// Check whether a call should be allowed through.
    ///
    /// Implements lazy Open -> Half-Open transition once the recovery
    /// timeout has strictly elapsed since the last failure.
    pub(crate) fn check_state(&mut self, settings: &BreakerSettings) -> CheckResult {
        match self.state {
            CircuitState::Closed => CheckResult::Allowed,
            CircuitState::Open => {
                let recovered = self
                    .last_failure_at
                    .map_or(true, |at| at.elapsed() > settings.recovery_timeout);
                if recovered {
                    self.state = CircuitState::HalfOpen;
                    self.failure_count = 0;
                    self.probe_in_flight = false;
                    tracing::info!("circuit entering Half-Open: recovery timeout expired");
                    self.try_acquire_probe()
                } else {
                    CheckResult::Rejected
                }
            }
            CircuitState::HalfOpen => self.try_acquire_probe(),
        }
    }

    fn try_acquire_probe(&mut self) -> CheckResult {
        if !self.probe_in_flight {
            self.probe_in_flight = true;
            CheckResult::ProbePermit
        } else {
            CheckResult::Rejected
        }
    }

    /// Record a failure of a normally-permitted call.
    ///
    /// In Closed state this counts toward the threshold. A late failure that
    /// lands after the circuit left Closed only updates the last error.
    pub(crate) fn record_failure(
        &mut self,
        provider: ProviderId,
        settings: &BreakerSettings,
        error_type: &str,
        message: &str,
    ) {
        self.last_error = Some(LastError {
            error_type: error_type.to_string(),
            message: message.to_string(),
        });

        if self.state != CircuitState::Closed {
            return;
        }

        self.failure_count += 1;
        self.last_failure_at = Some(Instant::now());

        if self.failure_count >= settings.failure_threshold {
            self.state = CircuitState::Open;
            self.trip_count += 1;

            tracing::warn!(
                provider = %provider,
                failure_count = self.failure_count,
                last_error = ?self.last_error,
                trip_count = self.trip_count,
                "circuit OPENED: {} consecutive failures",
                self.failure_count,
            );
        }
    }

    /// Record a success of a normally-permitted call. Resets the failure
    /// counter when Closed; never closes a Half-Open circuit.
    pub(crate) fn record_success(&mut self, provider: ProviderId) {
        if self.state == CircuitState::Closed {
            self.failure_count = 0;
            tracing::debug!(
                provider = %provider,
                "circuit breaker: success recorded, failure count reset",
            );
        }
    }

    /// Half-Open -> Closed.
    pub(crate) fn record_probe_success(&mut self, provider: ProviderId) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.probe_in_flight = false;

        tracing::info!(
            provider = %provider,
            trip_count = self.trip_count,
            "circuit CLOSED: probe succeeded",
        );
    }

    /// Half-Open -> Open with a fresh last-failure time.
    pub(crate) fn record_probe_failure(
        &mut self,
        provider: ProviderId,
        error_type: &str,
        message: &str,
    ) {
        self.state = CircuitState::Open;
        self.last_failure_at = Some(Instant::now());
        self.probe_in_flight = false;
        self.last_error = Some(LastError {
            error_type: error_type.to_string(),
            message: message.to_string(),
        });

        tracing::warn!(
            provider = %provider,
            trip_count = self.trip_count,
            "circuit REOPENED: probe failed",
        );
    }

    /// Force Closed with zeroed counters. Trip history is kept.
    pub(crate) fn reset(&mut self) {
        self.state = CircuitState::Closed;
        self.failure_count = 0;
        self.last_failure_at = None;
        self.probe_in_flight = false;
    }
}

// ── Permit type ──────────────────────────────────────────────────────

/// Type of permit returned by [`CircuitBreakerRegistry::acquire_permit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitType {
    /// Normal call through a closed circuit.
    Normal,
    /// Probe call through a half-open circuit. Caller MUST use [`ProbeGuard`].
    Probe,
}

// ── Registry ─────────────────────────────────────────────────────────

/// Concurrent circuit breaker registry with one breaker per provider.
///
/// Backed by [`DashMap`] for per-shard locking (no cross-provider contention).
/// Each breaker lives for the lifetime of the registry.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<ProviderId, std::sync::Mutex<CircuitBreakerInner>>,
    settings: BreakerSettings,
}

impl CircuitBreakerRegistry {
    /// Create a registry with one Closed breaker per provider.
    pub fn new(providers: &[ProviderId], settings: BreakerSettings) -> Self {
        let breakers = DashMap::with_capacity(providers.len());
        for id in providers {
            breakers.insert(*id, std::sync::Mutex::new(CircuitBreakerInner::new()));
        }
        Self { breakers, settings }
    }

    pub fn settings(&self) -> BreakerSettings {
        self.settings
    }

    /// Check whether a call to `provider` should proceed.
    ///
    /// Returns `Ok(PermitType::Normal)` for closed circuits,
    /// `Ok(PermitType::Probe)` for the single half-open probe permit,
    /// or `Err(CircuitOpenError)` otherwise.
    ///
    /// Unknown providers are allowed through.
    pub fn acquire_permit(&self, provider: ProviderId) -> Result<PermitType, CircuitOpenError> {
        let Some(entry) = self.breakers.get(&provider) else {
            return Ok(PermitType::Normal);
        };

        let mut inner = entry.value().lock().unwrap();
        match inner.check_state(&self.settings) {
            CheckResult::Allowed => Ok(PermitType::Normal),
            CheckResult::ProbePermit => Ok(PermitType::Probe),
            CheckResult::Rejected => Err(CircuitOpenError {
                provider,
                reason: match (&inner.state, &inner.last_error) {
                    (CircuitState::HalfOpen, _) => "recovery probe in flight".to_string(),
                    (_, Some(e)) => e.to_string(),
                    (_, None) => "unknown".to_string(),
                },
                trip_count: inner.trip_count,
            }),
        }
    }

    pub fn record_success(&self, provider: ProviderId) {
        if let Some(entry) = self.breakers.get(&provider) {
            entry.value().lock().unwrap().record_success(provider);
        }
    }

    pub fn record_failure(&self, provider: ProviderId, error_type: &str, message: &str) {
        if let Some(entry) = self.breakers.get(&provider) {
            entry
                .value()
                .lock()
                .unwrap()
                .record_failure(provider, &self.settings, error_type, message);
        }
    }

    pub fn record_probe_success(&self, provider: ProviderId) {
        if let Some(entry) = self.breakers.get(&provider) {
            entry.value().lock().unwrap().record_probe_success(provider);
        }
    }

    pub fn record_probe_failure(&self, provider: ProviderId, error_type: &str, message: &str) {
        if let Some(entry) = self.breakers.get(&provider) {
            entry
                .value()
                .lock()
                .unwrap()
                .record_probe_failure(provider, error_type, message);
        }
    }

    /// Force `provider`'s circuit Closed. Returns false for unknown providers.
    pub fn reset(&self, provider: ProviderId) -> bool {
        match self.breakers.get(&provider) {
            Some(entry) => {
                entry.value().lock().unwrap().reset();
                tracing::info!(provider = %provider, "circuit RESET by operator");
                true
            }
            None => false,
        }
    }

    /// Snapshot of every circuit, in enumeration order.
    pub fn all_states(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<CircuitSnapshot> = self
            .breakers
            .iter()
            .map(|entry| {
                let inner = entry.value().lock().unwrap();
                CircuitSnapshot {
                    provider: *entry.key(),
                    state: inner.state,
                    failure_count: inner.failure_count,
                    trip_count: inner.trip_count,
                    last_error: inner.last_error.as_ref().map(|e| e.to_string()),
                }
            })
            .collect();
        all.sort_by_key(|s| s.provider);
        all
    }

    pub fn state(&self, provider: ProviderId) -> Option<CircuitState> {
        self.breakers
            .get(&provider)
            .map(|entry| entry.value().lock().unwrap().state)
    }

    pub fn failure_count(&self, provider: ProviderId) -> Option<u32> {
        self.breakers
            .get(&provider)
            .map(|entry| entry.value().lock().unwrap().failure_count)
    }

    pub fn trip_count(&self, provider: ProviderId) -> Option<u32> {
        self.breakers
            .get(&provider)
            .map(|entry| entry.value().lock().unwrap().trip_count)
    }
}

// ── ProbeGuard RAII ──────────────────────────────────────────────────

/// RAII guard that ensures a half-open probe is always resolved.
///
/// If dropped without calling [`success`](ProbeGuard::success) or
/// [`failure`](ProbeGuard::failure) (for example when the call is
/// abandoned at a deadline), the probe is treated as a failure.
pub struct ProbeGuard<'a> {
    registry: &'a CircuitBreakerRegistry,
    provider: ProviderId,
    resolved: bool,
}

impl<'a> ProbeGuard<'a> {
    pub fn new(registry: &'a CircuitBreakerRegistry, provider: ProviderId) -> Self {
        Self {
            registry,
            provider,
            resolved: false,
        }
    }

    /// Mark the probe as successful. Closes the circuit.
    pub fn success(mut self) {
        self.resolved = true;
        self.registry.record_probe_success(self.provider);
    }

    /// Mark the probe as failed. Reopens the circuit.
    pub fn failure(mut self, error_type: &str, message: &str) {
        self.resolved = true;
        self.registry
            .record_probe_failure(self.provider, error_type, message);
    }
}

impl<'a> Drop for ProbeGuard<'a> {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::warn!(
                provider = %self.provider,
                "ProbeGuard dropped without resolution, treating as failure"
            );
            self.registry.record_probe_failure(
                self.provider,
                "abandoned",
                "probe dropped without resolution",
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: u32 = 5;
    const RECOVERY: Duration = Duration::from_secs(60);

    fn settings() -> BreakerSettings {
        BreakerSettings {
            failure_threshold: THRESHOLD,
            recovery_timeout: RECOVERY,
        }
    }

    const P: ProviderId = ProviderId::Gemini;

    fn trip_circuit(cb: &mut CircuitBreakerInner) {
        for _ in 0..THRESHOLD {
            cb.record_failure(P, &settings(), "provider_error", "Internal Server Error");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_state() {
        let cb = CircuitBreakerInner::new();
        assert_eq!(cb.state, CircuitState::Closed);
        assert_eq!(cb.failure_count, 0);
        assert_eq!(cb.trip_count, 0);
        assert!(cb.last_failure_at.is_none());
        assert!(cb.last_error.is_none());
        assert!(!cb.probe_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_below_threshold_stay_closed() {
        let mut cb = CircuitBreakerInner::new();
        for _ in 0..THRESHOLD - 1 {
            cb.record_failure(P, &settings(), "timeout", "Request timed out");
        }
        assert_eq!(cb.state, CircuitState::Closed);
        assert_eq!(cb.failure_count, THRESHOLD - 1);
        assert_eq!(cb.trip_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_threshold_failures_open_circuit() {
        let mut cb = CircuitBreakerInner::new();
        trip_circuit(&mut cb);
        assert_eq!(cb.state, CircuitState::Open);
        assert_eq!(cb.failure_count, THRESHOLD);
        assert_eq!(cb.trip_count, 1);
        assert!(cb.last_failure_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_resets_failure_count() {
        let mut cb = CircuitBreakerInner::new();
        for _ in 0..THRESHOLD - 1 {
            cb.record_failure(P, &settings(), "provider_error", "Error");
        }
        cb.record_success(P);
        assert_eq!(cb.failure_count, 0);

        for _ in 0..THRESHOLD - 1 {
            cb.record_failure(P, &settings(), "provider_error", "Error");
        }
        assert_eq!(cb.state, CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_until_recovery() {
        let mut cb = CircuitBreakerInner::new();
        trip_circuit(&mut cb);

        assert_eq!(cb.check_state(&settings()), CheckResult::Rejected);

        // Recovery requires strictly more than the timeout.
        tokio::time::advance(RECOVERY).await;
        assert_eq!(cb.check_state(&settings()), CheckResult::Rejected);
        assert_eq!(cb.state, CircuitState::Open);

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cb.check_state(&settings()), CheckResult::ProbePermit);
        assert_eq!(cb.state, CircuitState::HalfOpen);
        assert_eq!(cb.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_single_probe_permit() {
        let mut cb = CircuitBreakerInner::new();
        trip_circuit(&mut cb);
        tokio::time::advance(RECOVERY + Duration::from_secs(1)).await;

        assert_eq!(cb.check_state(&settings()), CheckResult::ProbePermit);
        assert_eq!(cb.check_state(&settings()), CheckResult::Rejected);
        assert_eq!(cb.check_state(&settings()), CheckResult::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_success_closes_circuit() {
        let mut cb = CircuitBreakerInner::new();
        trip_circuit(&mut cb);
        tokio::time::advance(RECOVERY + Duration::from_secs(1)).await;
        cb.check_state(&settings());

        cb.record_probe_success(P);
        assert_eq!(cb.state, CircuitState::Closed);
        assert_eq!(cb.failure_count, 0);
        assert!(!cb.probe_in_flight);
        assert_eq!(cb.check_state(&settings()), CheckResult::Allowed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_failure_reopens_with_fresh_timer() {
        let mut cb = CircuitBreakerInner::new();
        trip_circuit(&mut cb);
        tokio::time::advance(RECOVERY + Duration::from_secs(1)).await;
        cb.check_state(&settings());
        let before = cb.last_failure_at;

        cb.record_probe_failure(P, "provider_error", "Still broken");
        assert_eq!(cb.state, CircuitState::Open);
        assert!(!cb.probe_in_flight);
        assert_ne!(cb.last_failure_at, before);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cb.check_state(&settings()), CheckResult::Rejected);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(cb.check_state(&settings()), CheckResult::ProbePermit);
    }

    #[tokio::test(start_paused = true)]
    async fn test_straggler_success_does_not_close_half_open() {
        let mut cb = CircuitBreakerInner::new();
        trip_circuit(&mut cb);
        tokio::time::advance(RECOVERY + Duration::from_secs(1)).await;
        cb.check_state(&settings());

        cb.record_success(P);
        assert_eq!(cb.state, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_failure_does_not_retrip() {
        let mut cb = CircuitBreakerInner::new();
        trip_circuit(&mut cb);
        cb.record_failure(P, &settings(), "timeout", "late");
        assert_eq!(cb.trip_count, 1);
        assert_eq!(cb.last_error.as_ref().unwrap().message, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_count_increments() {
        let mut cb = CircuitBreakerInner::new();
        trip_circuit(&mut cb);
        tokio::time::advance(RECOVERY + Duration::from_secs(1)).await;
        cb.check_state(&settings());
        cb.record_probe_success(P);

        trip_circuit(&mut cb);
        assert_eq!(cb.state, CircuitState::Open);
        assert_eq!(cb.trip_count, 2);
    }

    // ── Registry tests ───────────────────────────────────────────────

    fn registry() -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(&ProviderId::ALL, settings())
    }

    fn trip_registry(registry: &CircuitBreakerRegistry, provider: ProviderId) {
        for _ in 0..THRESHOLD {
            registry.record_failure(provider, "provider_error", "Internal Server Error");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_starts_closed() {
        let registry = registry();
        for id in ProviderId::ALL {
            assert_eq!(registry.state(id), Some(CircuitState::Closed));
            assert_eq!(registry.acquire_permit(id).unwrap(), PermitType::Normal);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_unknown_provider_allowed() {
        let registry = CircuitBreakerRegistry::new(&[ProviderId::Gemini], settings());
        assert_eq!(
            registry.acquire_permit(ProviderId::Llama).unwrap(),
            PermitType::Normal
        );
        assert!(!registry.reset(ProviderId::Llama));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_open_rejected_with_reason() {
        let registry = registry();
        trip_registry(&registry, ProviderId::Gemini);

        let err = registry.acquire_permit(ProviderId::Gemini).unwrap_err();
        assert_eq!(err.provider, ProviderId::Gemini);
        assert_eq!(err.trip_count, 1);
        assert!(err.reason.contains("Internal Server Error"));

        // Other providers are unaffected.
        assert_eq!(
            registry.acquire_permit(ProviderId::Llama).unwrap(),
            PermitType::Normal
        );

        let converted: Error = err.into();
        assert!(matches!(converted, Error::CircuitOpen { provider: ProviderId::Gemini, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_half_open_rejects_concurrent_callers() {
        let registry = registry();
        trip_registry(&registry, ProviderId::Gemini);
        tokio::time::advance(RECOVERY + Duration::from_secs(1)).await;

        assert_eq!(
            registry.acquire_permit(ProviderId::Gemini).unwrap(),
            PermitType::Probe
        );
        let err = registry.acquire_permit(ProviderId::Gemini).unwrap_err();
        assert!(err.reason.contains("probe"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_reset_forces_closed() {
        let registry = registry();
        trip_registry(&registry, ProviderId::Llama);
        assert_eq!(registry.state(ProviderId::Llama), Some(CircuitState::Open));

        assert!(registry.reset(ProviderId::Llama));
        assert_eq!(registry.state(ProviderId::Llama), Some(CircuitState::Closed));
        assert_eq!(registry.failure_count(ProviderId::Llama), Some(0));
        assert_eq!(registry.trip_count(ProviderId::Llama), Some(1));
        assert_eq!(
            registry.acquire_permit(ProviderId::Llama).unwrap(),
            PermitType::Normal
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_states_in_enumeration_order() {
        let registry = registry();
        trip_registry(&registry, ProviderId::Llama);
        let states = registry.all_states();
        assert_eq!(states.len(), 2);
        assert_eq!(states[0].provider, ProviderId::Gemini);
        assert_eq!(states[0].state, CircuitState::Closed);
        assert_eq!(states[1].provider, ProviderId::Llama);
        assert_eq!(states[1].state, CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_guard_success() {
        let registry = registry();
        trip_registry(&registry, ProviderId::Gemini);
        tokio::time::advance(RECOVERY + Duration::from_secs(1)).await;
        assert_eq!(registry.acquire_permit(ProviderId::Gemini).unwrap(), PermitType::Probe);

        ProbeGuard::new(&registry, ProviderId::Gemini).success();
        assert_eq!(registry.state(ProviderId::Gemini), Some(CircuitState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_guard_failure() {
        let registry = registry();
        trip_registry(&registry, ProviderId::Gemini);
        tokio::time::advance(RECOVERY + Duration::from_secs(1)).await;
        assert_eq!(registry.acquire_permit(ProviderId::Gemini).unwrap(), PermitType::Probe);

        ProbeGuard::new(&registry, ProviderId::Gemini).failure("timeout", "Still slow");
        assert_eq!(registry.state(ProviderId::Gemini), Some(CircuitState::Open));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_guard_drop_without_resolution() {
        let registry = registry();
        trip_registry(&registry, ProviderId::Gemini);
        tokio::time::advance(RECOVERY + Duration::from_secs(1)).await;
        assert_eq!(registry.acquire_permit(ProviderId::Gemini).unwrap(), PermitType::Probe);

        {
            let _guard = ProbeGuard::new(&registry, ProviderId::Gemini);
        }

        assert_eq!(registry.state(ProviderId::Gemini), Some(CircuitState::Open));
        // The probe permit was released with the reopen.
        tokio::time::advance(RECOVERY + Duration::from_secs(1)).await;
        assert_eq!(registry.acquire_permit(ProviderId::Gemini).unwrap(), PermitType::Probe);
    }
}
