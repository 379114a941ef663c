//! Router module for provider selection.
//!
//! This module decides where a consultation goes:
//! - Query classification into a category with a static profile
//! - Provider liveness (cached probes)
//! - Historical performance counters
//! - Adaptive selection combining the three

mod availability;
mod classifier;
mod selector;
mod stats;

pub use availability::{Availability, AvailabilityCache};
pub use classifier::{
    CachePriority, Classification, OptimizationProfile, Preference, QueryCategory,
    QueryClassifier,
};
pub use selector::{adaptive_score, ProviderPreference, ProviderSelector};
pub use stats::{PatternStats, ProviderStats, RequestTotals, StatsTracker};
