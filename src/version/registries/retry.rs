//! Bounded timeout and retry-with-backoff around any registry

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::warn;

use crate::config::RetryConfig;
use crate::version::error::RegistryError;
use crate::version::registry::Registry;
use crate::version::types::{ApplicationVersion, ListedVersion, Properties};

/// Registry decorator that bounds every call by a timeout and retries
/// transient failures with exponential backoff.
///
/// Permanent failures pass through untouched. When attempts run out the last
/// transient error is wrapped in [`RegistryError::RetriesExhausted`].
pub struct RetryingRegistry {
    inner: Arc<dyn Registry>,
    config: RetryConfig,
}

impl RetryingRegistry {
    pub fn new(inner: Arc<dyn Registry>, config: RetryConfig) -> Self {
        Self { inner, config }
    }

    /// Delay before retry number `attempt` (1-based).
    fn backoff_delay(&self, attempt: u32, error: &RegistryError) -> Duration {
        let shift = attempt.saturating_sub(1).min(20);
        let exponential = self.config.base_delay_ms.saturating_mul(1u64 << shift);
        let requested = match error {
            RegistryError::RateLimited {
                retry_after_secs: Some(secs),
            } => secs.saturating_mul(1000),
            _ => 0,
        };
        Duration::from_millis(exponential.max(requested).min(self.config.max_delay_ms))
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, call: F) -> Result<T, RegistryError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, RegistryError>> + Send,
        T: Send,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let attempt_timeout = Duration::from_millis(self.config.attempt_timeout_ms);
        let mut attempt = 1;

        loop {
            let result = match timeout(attempt_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(RegistryError::Timeout {
                    timeout_ms: self.config.attempt_timeout_ms,
                }),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) if attempt >= max_attempts => {
                    return Err(RegistryError::RetriesExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.backoff_delay(attempt, &e);
                    warn!(
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient registry failure, retrying"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl Registry for RetryingRegistry {
    async fn list_versions(
        &self,
        application_key: &str,
    ) -> Result<Vec<ListedVersion>, RegistryError> {
        self.with_retry("list_versions", move || {
            self.inner.list_versions(application_key)
        })
        .await
    }

    async fn get_version_detail(
        &self,
        application_key: &str,
        version: &str,
    ) -> Result<ApplicationVersion, RegistryError> {
        self.with_retry("get_version_detail", move || {
            self.inner.get_version_detail(application_key, version)
        })
        .await
    }

    async fn replace_tag(
        &self,
        application_key: &str,
        version: &str,
        tag: &str,
    ) -> Result<(), RegistryError> {
        self.with_retry("replace_tag", move || {
            self.inner.replace_tag(application_key, version, tag)
        })
        .await
    }

    async fn upsert_properties(
        &self,
        application_key: &str,
        version: &str,
        properties: &Properties,
    ) -> Result<(), RegistryError> {
        self.with_retry("upsert_properties", move || {
            self.inner
                .upsert_properties(application_key, version, properties)
        })
        .await
    }
}
