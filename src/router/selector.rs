//! Provider selection logic.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::availability::Availability;
use super::classifier::{Preference, QueryCategory};
use super::stats::{ProviderStats, StatsTracker};
use crate::provider::{ProviderId, UnknownProvider};

/// Weight of the historical-favorite bonus.
const FAVORED_BONUS: f64 = 1.2;

/// Penalty for a provider that failed recently.
const RECENT_FAILURE_PENALTY: f64 = 0.5;

/// Caller's provider choice for a consultation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ProviderPreference {
    /// Let the router decide.
    #[default]
    Auto,
    /// Use this provider only.
    Specific(ProviderId),
    /// Every available provider.
    All,
}

impl FromStr for ProviderPreference {
    type Err = UnknownProvider;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "auto" => Ok(ProviderPreference::Auto),
            "all" => Ok(ProviderPreference::All),
            other => other.parse().map(ProviderPreference::Specific),
        }
    }
}

impl TryFrom<String> for ProviderPreference {
    type Error = UnknownProvider;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ProviderPreference> for String {
    fn from(p: ProviderPreference) -> Self {
        p.to_string()
    }
}

impl fmt::Display for ProviderPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderPreference::Auto => f.write_str("auto"),
            ProviderPreference::All => f.write_str("all"),
            ProviderPreference::Specific(id) => write!(f, "{}", id),
        }
    }
}

/// Adaptive score of one provider for a category.
///
/// `success_rate * (0.7 + 0.3 * speed)` where speed falls linearly from 1 at
/// zero latency to 0.1 at nine seconds and beyond.
pub fn adaptive_score(
    stats: &ProviderStats,
    category: QueryCategory,
    recent_failure_window: Duration,
) -> f64 {
    let speed = stats
        .avg_latency()
        .map(|avg| ((10.0 - avg.as_secs_f64()) / 10.0).clamp(0.1, 1.0))
        .unwrap_or(1.0);

    let mut score = stats.success_rate() * (0.7 + 0.3 * speed);

    if category.favored_provider() == Some(stats.provider) {
        score *= FAVORED_BONUS;
    }
    if stats.failed_within(recent_failure_window) {
        score *= RECENT_FAILURE_PENALTY;
    }
    score
}

/// Chooses which providers serve a request.
#[derive(Debug, Clone)]
pub struct ProviderSelector {
    recent_failure_window: Duration,
}

impl ProviderSelector {
    pub fn new(recent_failure_window: Duration) -> Self {
        Self {
            recent_failure_window,
        }
    }

    /// Select providers for a request, in dispatch order.
    ///
    /// An empty result means nothing suitable is available.
    pub fn select(
        &self,
        preference: ProviderPreference,
        compare: bool,
        category: QueryCategory,
        availability: &Availability,
        stats: &StatsTracker,
    ) -> Vec<ProviderId> {
        let available: Vec<ProviderId> = availability
            .iter()
            .filter(|(_, up)| **up)
            .map(|(id, _)| *id)
            .collect();

        match preference {
            ProviderPreference::Specific(id) => {
                return if available.contains(&id) {
                    vec![id]
                } else {
                    tracing::debug!(provider = %id, "Pinned provider unavailable");
                    Vec::new()
                };
            }
            ProviderPreference::All => return available,
            ProviderPreference::Auto => {}
        }

        if compare && available.len() >= 2 {
            return available;
        }

        match category.profile().preferred {
            Preference::Only(id) if available.contains(&id) => {
                tracing::debug!(
                    provider = %id,
                    category = %category,
                    "Using category-preferred provider"
                );
                return vec![id];
            }
            Preference::All => return available,
            _ => {}
        }

        self.best_scoring(&available, category, stats)
            .into_iter()
            .collect()
    }

    fn best_scoring(
        &self,
        candidates: &[ProviderId],
        category: QueryCategory,
        stats: &StatsTracker,
    ) -> Option<ProviderId> {
        let mut best: Option<(ProviderId, f64)> = None;
        for id in candidates {
            let score = adaptive_score(&stats.provider(*id), category, self.recent_failure_window);
            tracing::trace!(provider = %id, score, "Adaptive score");
            // Strict comparison keeps the earlier provider on ties.
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((*id, score));
            }
        }
        best.map(|(id, _)| id)
    }
}
