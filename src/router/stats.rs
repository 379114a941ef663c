//! Rolling performance counters.
//!
//! Per-provider attempt stats feed adaptive selection. Per-category and
//! whole-request totals are reported on the status endpoint.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::classifier::QueryCategory;
use crate::provider::ProviderId;

/// Latency samples kept per provider.
const PROVIDER_WINDOW: usize = 100;

/// Request durations kept for the overall rolling average.
const REQUEST_WINDOW: usize = 1000;

#[derive(Debug, Default)]
struct ProviderCounters {
    requests: u64,
    successes: u64,
    failures: u64,
    recent: VecDeque<Duration>,
    min: Option<Duration>,
    max: Option<Duration>,
    last_failure_at: Option<Instant>,
}

impl ProviderCounters {
    fn record(&mut self, success: bool, latency: Duration) {
        self.requests += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
            self.last_failure_at = Some(Instant::now());
        }

        if self.recent.len() == PROVIDER_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(latency);
        self.min = Some(self.min.map_or(latency, |m| m.min(latency)));
        self.max = Some(self.max.map_or(latency, |m| m.max(latency)));
    }

    fn average(&self) -> Option<Duration> {
        if self.recent.is_empty() {
            return None;
        }
        let total: Duration = self.recent.iter().sum();
        Some(total / self.recent.len() as u32)
    }

    fn snapshot(&self, id: ProviderId) -> ProviderStats {
        ProviderStats {
            provider: id,
            requests: self.requests,
            successes: self.successes,
            failures: self.failures,
            avg_latency_ms: self.average().map(|d| d.as_secs_f64() * 1000.0),
            min_latency_ms: self.min.map(|d| d.as_secs_f64() * 1000.0),
            max_latency_ms: self.max.map(|d| d.as_secs_f64() * 1000.0),
            last_failure_at: self.last_failure_at,
        }
    }
}

/// Point-in-time view of one provider's counters.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStats {
    pub provider: ProviderId,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    /// Average over the recent-sample window.
    pub avg_latency_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
    #[serde(skip)]
    pub last_failure_at: Option<Instant>,
}

impl ProviderStats {
    /// Successes over requests, 1.0 with no history.
    pub fn success_rate(&self) -> f64 {
        if self.requests == 0 {
            1.0
        } else {
            self.successes as f64 / self.requests as f64
        }
    }

    pub fn avg_latency(&self) -> Option<Duration> {
        self.avg_latency_ms
            .map(|ms| Duration::from_secs_f64(ms / 1000.0))
    }

    /// Whether the last failure happened within `window` of now.
    pub fn failed_within(&self, window: Duration) -> bool {
        self.last_failure_at
            .is_some_and(|at| Instant::now().duration_since(at) < window)
    }
}

/// Per-category request analytics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PatternStats {
    pub count: u64,
    pub avg_elapsed_ms: f64,
    pub cache_hits: u64,
}

#[derive(Debug, Default)]
struct Totals {
    requests: u64,
    cache_hits: u64,
    cache_misses: u64,
    errors: u64,
    recent: VecDeque<Duration>,
}

/// Whole-request analytics.
#[derive(Debug, Clone, Serialize)]
pub struct RequestTotals {
    pub requests: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub errors: u64,
    pub avg_response_ms: f64,
    pub cache_hit_rate: f64,
}

/// Shared counters, safe to update from concurrent requests.
#[derive(Debug, Default)]
pub struct StatsTracker {
    providers: DashMap<ProviderId, ProviderCounters>,
    patterns: DashMap<QueryCategory, PatternStats>,
    totals: Mutex<Totals>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one provider invocation.
    pub fn record_attempt(&self, provider: ProviderId, success: bool, latency: Duration) {
        self.providers
            .entry(provider)
            .or_default()
            .record(success, latency);
    }

    pub fn provider(&self, provider: ProviderId) -> ProviderStats {
        self.providers
            .get(&provider)
            .map(|c| c.snapshot(provider))
            .unwrap_or_else(|| ProviderCounters::default().snapshot(provider))
    }

    /// Snapshots for every provider with history, in enumeration order.
    pub fn providers(&self) -> Vec<ProviderStats> {
        let mut all: Vec<ProviderStats> = self
            .providers
            .iter()
            .map(|e| e.value().snapshot(*e.key()))
            .collect();
        all.sort_by_key(|s| s.provider);
        all
    }

    /// Record one completed consultation.
    pub fn record_request(
        &self,
        category: QueryCategory,
        elapsed: Duration,
        cache_hit: bool,
        success: bool,
    ) {
        {
            let mut pattern = self.patterns.entry(category).or_default();
            let n = pattern.count as f64;
            let ms = elapsed.as_secs_f64() * 1000.0;
            pattern.avg_elapsed_ms = (pattern.avg_elapsed_ms * n + ms) / (n + 1.0);
            pattern.count += 1;
            if cache_hit {
                pattern.cache_hits += 1;
            }
        }

        let mut totals = self.totals.lock().unwrap();
        totals.requests += 1;
        if cache_hit {
            totals.cache_hits += 1;
        } else {
            totals.cache_misses += 1;
        }
        if !success {
            totals.errors += 1;
        }
        if totals.recent.len() == REQUEST_WINDOW {
            totals.recent.pop_front();
        }
        totals.recent.push_back(elapsed);
    }

    pub fn patterns(&self) -> Vec<(QueryCategory, PatternStats)> {
        QueryCategory::ALL
            .iter()
            .filter_map(|c| self.patterns.get(c).map(|p| (*c, p.clone())))
            .collect()
    }

    pub fn totals(&self) -> RequestTotals {
        let totals = self.totals.lock().unwrap();
        let avg_response_ms = if totals.recent.is_empty() {
            0.0
        } else {
            let sum: Duration = totals.recent.iter().sum();
            sum.as_secs_f64() * 1000.0 / totals.recent.len() as f64
        };
        let lookups = totals.cache_hits + totals.cache_misses;
        let cache_hit_rate = if lookups == 0 {
            0.0
        } else {
            totals.cache_hits as f64 / lookups as f64
        };

        RequestTotals {
            requests: totals.requests,
            cache_hits: totals.cache_hits,
            cache_misses: totals.cache_misses,
            errors: totals.errors,
            avg_response_ms,
            cache_hit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_provider_has_optimistic_defaults() {
        let stats = StatsTracker::new().provider(ProviderId::Gemini);
        assert_eq!(stats.requests, 0);
        assert_eq!(stats.success_rate(), 1.0);
        assert!(stats.avg_latency().is_none());
    }

    #[tokio::test]
    async fn test_record_attempts() {
        let tracker = StatsTracker::new();
        tracker.record_attempt(ProviderId::Llama, true, Duration::from_millis(100));
        tracker.record_attempt(ProviderId::Llama, false, Duration::from_millis(300));

        let stats = tracker.provider(ProviderId::Llama);
        assert_eq!(stats.requests, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);
        assert_eq!(stats.success_rate(), 0.5);
        assert_eq!(stats.avg_latency_ms, Some(200.0));
        assert_eq!(stats.min_latency_ms, Some(100.0));
        assert_eq!(stats.max_latency_ms, Some(300.0));
        assert!(stats.last_failure_at.is_some());
    }

    #[tokio::test]
    async fn test_latency_window_drops_oldest() {
        let tracker = StatsTracker::new();
        tracker.record_attempt(ProviderId::Gemini, true, Duration::from_secs(50));
        for _ in 0..PROVIDER_WINDOW {
            tracker.record_attempt(ProviderId::Gemini, true, Duration::from_secs(1));
        }

        let stats = tracker.provider(ProviderId::Gemini);
        assert_eq!(stats.requests, PROVIDER_WINDOW as u64 + 1);
        assert_eq!(stats.avg_latency(), Some(Duration::from_secs(1)));
        // Extremes are lifetime values, not windowed.
        assert_eq!(stats.max_latency_ms, Some(50_000.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recent_failure_window() {
        let tracker = StatsTracker::new();
        tracker.record_attempt(ProviderId::Gemini, false, Duration::from_secs(1));
        assert!(tracker
            .provider(ProviderId::Gemini)
            .failed_within(Duration::from_secs(300)));

        tokio::time::advance(Duration::from_secs(301)).await;
        assert!(!tracker
            .provider(ProviderId::Gemini)
            .failed_within(Duration::from_secs(300)));
    }

    #[test]
    fn test_request_totals_and_patterns() {
        let tracker = StatsTracker::new();
        tracker.record_request(QueryCategory::Faq, Duration::from_millis(100), false, true);
        tracker.record_request(QueryCategory::Faq, Duration::from_millis(300), true, true);
        tracker.record_request(QueryCategory::Debug, Duration::from_millis(200), false, false);

        let totals = tracker.totals();
        assert_eq!(totals.requests, 3);
        assert_eq!(totals.cache_hits, 1);
        assert_eq!(totals.cache_misses, 2);
        assert_eq!(totals.errors, 1);
        assert!((totals.avg_response_ms - 200.0).abs() < 1e-6);
        assert!((totals.cache_hit_rate - 1.0 / 3.0).abs() < 1e-9);

        let patterns = tracker.patterns();
        assert_eq!(patterns.len(), 2);
        assert_eq!(patterns[0].0, QueryCategory::Faq);
        assert_eq!(patterns[0].1.count, 2);
        assert_eq!(patterns[0].1.cache_hits, 1);
        assert!((patterns[0].1.avg_elapsed_ms - 200.0).abs() < 1e-6);
    }
}
