//! Scripted in-process providers shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use consultr::consult::{ConsultRouter, RegisteredProvider, RouterSettings};
use consultr::provider::{Provider, ProviderError, ProviderId, ProviderResponse};

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum Step {
    Answer(String),
    Fail(String),
    /// Sleep, then answer.
    Slow(Duration, String),
}

impl Step {
    pub fn answer(text: &str) -> Self {
        Step::Answer(text.to_string())
    }

    pub fn fail(message: &str) -> Self {
        Step::Fail(message.to_string())
    }
}

/// Provider whose replies come from a queue, falling back to a default step
/// once the queue is empty.
pub struct MockProvider {
    id: ProviderId,
    available: AtomicBool,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    timeouts: Mutex<Vec<Duration>>,
}

impl MockProvider {
    pub fn new(id: ProviderId, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            id,
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            fallback,
            calls: AtomicUsize::new(0),
            timeouts: Mutex::new(Vec::new()),
        })
    }

    pub fn answering(id: ProviderId, text: &str) -> Arc<Self> {
        Self::new(id, Step::answer(text))
    }

    pub fn failing(id: ProviderId) -> Arc<Self> {
        Self::new(id, Step::fail("backend exploded"))
    }

    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Timeouts passed to each invocation, in call order.
    pub fn timeouts(&self) -> Vec<Duration> {
        self.timeouts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    async fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    async fn invoke(
        &self,
        _query: &str,
        _context: &str,
        timeout: Duration,
    ) -> Result<ProviderResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.timeouts.lock().unwrap().push(timeout);

        let step = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Answer(text) => Ok(ProviderResponse {
                text,
                model_id: format!("{}-test", self.id),
            }),
            Step::Fail(message) => Err(ProviderError::Failed(message)),
            Step::Slow(delay, text) => {
                tokio::time::sleep(delay).await;
                Ok(ProviderResponse {
                    text,
                    model_id: format!("{}-test", self.id),
                })
            }
        }
    }
}

/// Register mocks with a generous rate limit.
pub fn registered(providers: &[Arc<MockProvider>], rpm: u32) -> Vec<RegisteredProvider> {
    providers
        .iter()
        .map(|p| RegisteredProvider::new(p.clone() as Arc<dyn Provider>, rpm))
        .collect()
}

/// Router with the default settings, an in-memory cache and the given mocks.
pub fn router_with(providers: &[Arc<MockProvider>]) -> ConsultRouter {
    router_with_settings(providers, RouterSettings::default(), 1000)
}

pub fn router_with_settings(
    providers: &[Arc<MockProvider>],
    settings: RouterSettings,
    rpm: u32,
) -> ConsultRouter {
    let cache = Arc::new(consultr::cache::ResponseCache::new(
        Duration::from_secs(48 * 3600),
        1000,
        None,
    ));
    ConsultRouter::new(registered(providers, rpm), settings, Some(cache))
}
