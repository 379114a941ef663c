//! Periodic cache-expiry sweep owned by the router's lifecycle.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::cache::ResponseCache;

/// `interval_at` panics on a zero period.
const MIN_INTERVAL: Duration = Duration::from_millis(1);
const MAX_INTERVAL: Duration = Duration::from_secs(365 * 24 * 3600);

/// Handle to a running sweep task.
pub struct Sweeper {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a task that calls `clear_expired` every `interval`.
    ///
    /// The first sweep runs one full interval after start. The period is
    /// kept between one millisecond and one year.
    pub fn spawn(cache: Arc<ResponseCache>, interval: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let interval = interval.clamp(MIN_INTERVAL, MAX_INTERVAL);

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop.changed() => {
                        tracing::debug!("Cache sweeper stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = cache.clear_expired().await;
                        if report.memory > 0 || report.durable > 0 {
                            tracing::info!(
                                memory = report.memory,
                                durable = report.durable,
                                "Swept expired cache entries"
                            );
                        }
                    }
                }
            }
        });

        Self { shutdown, handle }
    }

    /// Signal the task and wait for it to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Cache sweeper task ended abnormally");
        }
    }
}
