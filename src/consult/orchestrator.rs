//! Dispatch of one consultation to its selected providers.
//!
//! Two paths:
//! - **Sequential**: providers are tried in selection order, stopping at the
//!   first success unless every provider was asked for (comparison mode)
//! - **Parallel**: every selected provider is called at once and the results
//!   are collected in selection order, whatever order they complete in
//!
//! Each attempt passes the concurrency permit, the rate limiter and the
//! circuit breaker before the provider is invoked. Any per-provider error is
//! turned into a failed [`ProviderOutcome`]; nothing here aborts the request.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::circuit_breaker::{CircuitBreakerRegistry, PermitType, ProbeGuard};
use super::rate_limit::RateLimiter;
use super::types::ProviderOutcome;
use crate::error::Error;
use crate::provider::{Provider, ProviderId};
use crate::router::StatsTracker;

/// Lower bound of a single call's timeout.
pub const MIN_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound of a single call's timeout.
pub const MAX_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Per-call timeout for a query.
///
/// Half the total budget, scaled by query length (long queries get 1.5x,
/// short ones 0.7x) and the category's multiplier, clamped to
/// [`MIN_CALL_TIMEOUT`, `MAX_CALL_TIMEOUT`].
pub fn adaptive_timeout(total: Duration, query: &str, pattern_multiplier: f64) -> Duration {
    let words = query.split_whitespace().count();
    let length_factor = if words > 50 {
        1.5
    } else if words < 10 {
        0.7
    } else {
        1.0
    };

    let secs = total.as_secs_f64() / 2.0 * length_factor * pattern_multiplier;
    // Infinities saturate through the clamp; NaN falls to the minimum.
    let secs = if secs.is_nan() { 0.0 } else { secs };
    Duration::from_secs_f64(secs.clamp(
        MIN_CALL_TIMEOUT.as_secs_f64(),
        MAX_CALL_TIMEOUT.as_secs_f64(),
    ))
}

/// Everything an attempt needs to know about the request.
pub(crate) struct DispatchPlan<'a> {
    pub query: &'a str,
    pub context: &'a str,
    pub selected: &'a [ProviderId],
    /// Keep going after the first success.
    pub exhaustive: bool,
    pub parallel: bool,
    pub call_timeout: Duration,
    /// Overall deadline for this consultation.
    pub deadline: Instant,
}

/// Borrowed view of the router's shared dispatch state.
pub(crate) struct Orchestrator<'a> {
    pub providers: &'a BTreeMap<ProviderId, Arc<dyn Provider>>,
    pub limiter: &'a RateLimiter,
    pub breakers: &'a CircuitBreakerRegistry,
    pub stats: &'a StatsTracker,
    pub permits: &'a Semaphore,
}

impl Orchestrator<'_> {
    /// Run the plan and return one outcome per attempted provider, in
    /// selection order.
    pub async fn dispatch(&self, plan: &DispatchPlan<'_>) -> Vec<ProviderOutcome> {
        if plan.parallel {
            tracing::debug!(providers = ?plan.selected, "Dispatching in parallel");
            join_all(plan.selected.iter().map(|id| self.attempt(*id, plan))).await
        } else {
            tracing::debug!(providers = ?plan.selected, "Dispatching sequentially");
            let mut outcomes = Vec::with_capacity(plan.selected.len());
            for id in plan.selected {
                let outcome = self.attempt(*id, plan).await;
                let succeeded = outcome.success;
                outcomes.push(outcome);
                if succeeded && !plan.exhaustive {
                    break;
                }
            }
            outcomes
        }
    }

    async fn attempt(&self, id: ProviderId, plan: &DispatchPlan<'_>) -> ProviderOutcome {
        let Some(provider) = self.providers.get(&id) else {
            let err = Error::Internal(format!("provider '{}' is not registered", id));
            return ProviderOutcome::failed(id, &err, 0);
        };

        let remaining = plan.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            let err = Error::ProviderTimeout {
                provider: id,
                timeout: Duration::ZERO,
            };
            return ProviderOutcome::failed(id, &err, 0);
        }

        // Waiting for a permit is not the provider's fault, so an expiry here
        // is reported but not recorded against it.
        let _permit = match tokio::time::timeout_at(plan.deadline, self.permits.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                let err = Error::Internal("concurrency limiter closed".to_string());
                return ProviderOutcome::failed(id, &err, 0);
            }
            Err(_) => {
                let err = Error::ProviderTimeout {
                    provider: id,
                    timeout: remaining,
                };
                return ProviderOutcome::failed(id, &err, 0);
            }
        };

        if let Err(e) = self.limiter.check(id) {
            return ProviderOutcome::failed(id, &e, 0);
        }

        let permit = match self.breakers.acquire_permit(id) {
            Ok(permit) => permit,
            Err(e) => {
                tracing::debug!(
                    provider = %id,
                    reason = %e.reason,
                    "Skipping provider, circuit open"
                );
                return ProviderOutcome::failed(id, &Error::from(e), 0);
            }
        };
        let probe = (permit == PermitType::Probe).then(|| ProbeGuard::new(self.breakers, id));

        let call_timeout = plan
            .call_timeout
            .min(plan.deadline.saturating_duration_since(Instant::now()));
        let started = Instant::now();
        let result = match tokio::time::timeout(
            call_timeout,
            provider.invoke(plan.query, plan.context, call_timeout),
        )
        .await
        {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(Error::Provider {
                provider: id,
                message: e.to_string(),
            }),
            Err(_) => Err(Error::ProviderTimeout {
                provider: id,
                timeout: call_timeout,
            }),
        };
        let latency = started.elapsed();
        let latency_ms = latency.as_millis() as u64;

        self.stats.record_attempt(id, result.is_ok(), latency);

        match result {
            Ok(response) => {
                match probe {
                    Some(guard) => guard.success(),
                    None => self.breakers.record_success(id),
                }
                tracing::debug!(
                    provider = %id,
                    model = %response.model_id,
                    latency_ms,
                    "Provider answered"
                );
                ProviderOutcome::succeeded(id, response.text, response.model_id, latency_ms)
            }
            Err(e) => {
                let message = e.to_string();
                match probe {
                    Some(guard) => guard.failure(e.kind().as_str(), &message),
                    None => self.breakers.record_failure(id, e.kind().as_str(), &message),
                }
                tracing::warn!(
                    provider = %id,
                    latency_ms,
                    error = %message,
                    "Provider attempt failed"
                );
                ProviderOutcome::failed(id, &e, latency_ms)
            }
        }
    }
}
