//! Per-provider request throttle over a one-minute window.

use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::Error;
use crate::provider::ProviderId;

/// Length of the counting window.
pub const WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Window {
    limit: u32,
    started_at: Instant,
    count: u32,
}

/// Counts attempts per provider and rejects those over the per-minute limit.
///
/// Providers with no configured limit are never throttled.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<ProviderId, Window>,
}

impl RateLimiter {
    pub fn new(limits: impl IntoIterator<Item = (ProviderId, u32)>) -> Self {
        let now = Instant::now();
        let windows = limits
            .into_iter()
            .map(|(id, limit)| {
                (
                    id,
                    Window {
                        limit,
                        started_at: now,
                        count: 0,
                    },
                )
            })
            .collect();
        Self { windows }
    }

    /// Admit one attempt against `provider`'s window, or reject it with the
    /// number of seconds until the window rolls over.
    pub fn check(&self, provider: ProviderId) -> Result<(), Error> {
        let Some(mut window) = self.windows.get_mut(&provider) else {
            return Ok(());
        };

        let now = Instant::now();
        let elapsed = now.duration_since(window.started_at);
        if elapsed > WINDOW {
            window.started_at = now;
            window.count = 0;
        }

        if window.count >= window.limit {
            let remaining = WINDOW.saturating_sub(now.duration_since(window.started_at));
            let retry_after_secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
            tracing::debug!(
                provider = %provider,
                limit = window.limit,
                retry_after_secs,
                "Rate limit reached"
            );
            return Err(Error::RateLimited {
                provider,
                retry_after_secs,
            });
        }

        window.count += 1;
        Ok(())
    }

    pub fn limit(&self, provider: ProviderId) -> Option<u32> {
        self.windows.get(&provider).map(|w| w.limit)
    }
}
