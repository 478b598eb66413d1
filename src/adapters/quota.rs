//! Quota cool-down and concurrency cap around any adapter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::warn;

use super::{ServiceAdapter, ServiceCall, ServiceError, ServiceResponse};
use crate::core::retry::{Sleeper, TokioSleeper};

/// Fixed cool-down when the provider gives no `Retry-After`
pub const DEFAULT_QUOTA_COOLDOWN: Duration = Duration::from_secs(60);

/// Default number of in-flight requests per provider
pub const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Wraps an adapter so a quota failure waits and retries exactly once
///
/// A second quota failure is returned to the caller, where it counts against
/// the phase's own attempt budget. All calls share one semaphore, capping the
/// number of concurrent requests to the provider.
pub struct QuotaGuard {
    inner: Arc<dyn ServiceAdapter>,
    sleeper: Arc<dyn Sleeper>,
    cooldown: Duration,
    permits: Arc<Semaphore>,
}

impl QuotaGuard {
    pub fn new(inner: Arc<dyn ServiceAdapter>) -> Self {
        Self {
            inner,
            sleeper: Arc::new(TokioSleeper),
            cooldown: DEFAULT_QUOTA_COOLDOWN,
            permits: Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT)),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.permits = Arc::new(Semaphore::new(max_concurrent.max(1)));
        self
    }

    async fn call_once(&self, call: ServiceCall) -> Result<ServiceResponse, ServiceError> {
        let _permit = self.permits.acquire().await.map_err(|_| {
            ServiceError::transient(self.inner.name(), "concurrency limiter closed")
        })?;
        self.inner.call(call).await
    }
}

#[async_trait]
impl ServiceAdapter for QuotaGuard {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn call(&self, call: ServiceCall) -> Result<ServiceResponse, ServiceError> {
        match self.call_once(call.clone()).await {
            Err(ServiceError::Quota { retry_after, message, .. }) => {
                let wait = retry_after.unwrap_or(self.cooldown);
                warn!(
                    provider = self.inner.name(),
                    operation = %call.operation,
                    wait_secs = wait.as_secs(),
                    "Quota exhausted ({}), cooling down before one retry",
                    message
                );
                // The permit is released while sleeping
                self.sleeper.sleep(wait).await;
                self.call_once(call).await
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::retry::RecordingSleeper;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with quota for the first `quota_failures` calls
    struct Flaky {
        calls: AtomicU32,
        quota_failures: u32,
        retry_after: Option<Duration>,
    }

    #[async_trait]
    impl ServiceAdapter for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn call(&self, _call: ServiceCall) -> Result<ServiceResponse, ServiceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.quota_failures {
                Err(ServiceError::quota("flaky", "HTTP 429", self.retry_after))
            } else {
                Ok(ServiceResponse::new(b"ok".to_vec()))
            }
        }
    }

    fn guard(inner: Arc<Flaky>, sleeper: Arc<RecordingSleeper>) -> QuotaGuard {
        QuotaGuard::new(inner).with_sleeper(sleeper)
    }

    #[tokio::test]
    async fn test_quota_waits_once_then_succeeds() {
        let inner = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            quota_failures: 1,
            retry_after: None,
        });
        let sleeper = Arc::new(RecordingSleeper::new());
        let guard = guard(inner.clone(), sleeper.clone());

        let response = guard.call(ServiceCall::get("x")).await.unwrap();
        assert_eq!(response.text(), "ok");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(60)]);
    }

    #[tokio::test]
    async fn test_second_quota_failure_is_returned() {
        let inner = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            quota_failures: 5,
            retry_after: None,
        });
        let sleeper = Arc::new(RecordingSleeper::new());
        let guard = guard(inner.clone(), sleeper.clone());

        let err = guard.call(ServiceCall::get("x")).await.unwrap_err();
        assert!(err.is_quota());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
        assert_eq!(sleeper.sleeps().len(), 1);
    }

    #[tokio::test]
    async fn test_retry_after_overrides_cooldown() {
        let inner = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            quota_failures: 1,
            retry_after: Some(Duration::from_secs(5)),
        });
        let sleeper = Arc::new(RecordingSleeper::new());
        let guard = guard(inner, sleeper.clone());

        guard.call(ServiceCall::get("x")).await.unwrap();
        assert_eq!(sleeper.sleeps(), vec![Duration::from_secs(5)]);
    }
}
