//! Short-lived cache of provider liveness probes.

use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::provider::{Provider, ProviderId};

/// Liveness per provider, in enumeration order.
pub type Availability = BTreeMap<ProviderId, bool>;

struct Snapshot {
    taken_at: Instant,
    availability: Availability,
}

/// Reuses the last probe round for `ttl`.
///
/// The async mutex is held while probing so concurrent requests share one
/// probe round instead of each starting their own.
pub struct AvailabilityCache {
    ttl: Duration,
    last: Mutex<Option<Snapshot>>,
}

impl AvailabilityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            last: Mutex::new(None),
        }
    }

    /// Current availability, probing all providers concurrently when the
    /// cached snapshot is missing or older than the TTL.
    pub async fn snapshot(&self, providers: &[Arc<dyn Provider>]) -> Availability {
        let mut last = self.last.lock().await;

        if let Some(snap) = last.as_ref() {
            if snap.taken_at.elapsed() < self.ttl {
                return snap.availability.clone();
            }
        }

        let probes = providers.iter().map(|p| async move {
            let available = p.is_available().await;
            (p.id(), available)
        });
        let availability: Availability = join_all(probes).await.into_iter().collect();

        tracing::debug!(?availability, "Refreshed provider availability");

        *last = Some(Snapshot {
            taken_at: Instant::now(),
            availability: availability.clone(),
        });
        availability
    }

    /// Last probed availability without probing.
    pub async fn cached(&self) -> Option<Availability> {
        self.last.lock().await.as_ref().map(|s| s.availability.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ProviderError, ProviderResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    struct Probe {
        id: ProviderId,
        up: AtomicBool,
        probes: AtomicU32,
    }

    #[async_trait]
    impl Provider for Probe {
        fn id(&self) -> ProviderId {
            self.id
        }

        async fn is_available(&self) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.up.load(Ordering::SeqCst)
        }

        async fn invoke(
            &self,
            _query: &str,
            _context: &str,
            _timeout: Duration,
        ) -> Result<ProviderResponse, ProviderError> {
            Err(ProviderError::Failed("not used".to_string()))
        }
    }

    fn probe(id: ProviderId, up: bool) -> Arc<Probe> {
        Arc::new(Probe {
            id,
            up: AtomicBool::new(up),
            probes: AtomicU32::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_reused_within_ttl() {
        let gemini = probe(ProviderId::Gemini, true);
        let llama = probe(ProviderId::Llama, false);
        let providers: Vec<Arc<dyn Provider>> = vec![gemini.clone(), llama.clone()];
        let cache = AvailabilityCache::new(Duration::from_secs(30));

        let first = cache.snapshot(&providers).await;
        assert_eq!(first.get(&ProviderId::Gemini), Some(&true));
        assert_eq!(first.get(&ProviderId::Llama), Some(&false));

        llama.up.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = cache.snapshot(&providers).await;
        assert_eq!(second, first);
        assert_eq!(llama.probes.load(Ordering::SeqCst), 1);

        tokio::time::advance(Duration::from_secs(21)).await;
        let third = cache.snapshot(&providers).await;
        assert_eq!(third.get(&ProviderId::Llama), Some(&true));
        assert_eq!(gemini.probes.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_reads_without_probing() {
        let gemini = probe(ProviderId::Gemini, true);
        let providers: Vec<Arc<dyn Provider>> = vec![gemini.clone()];
        let cache = AvailabilityCache::new(Duration::from_secs(30));

        assert!(cache.cached().await.is_none());
        cache.snapshot(&providers).await;

        let cached = cache.cached().await.unwrap();
        assert_eq!(cached.get(&ProviderId::Gemini), Some(&true));
        assert_eq!(gemini.probes.load(Ordering::SeqCst), 1);
    }
}
