// Fault isolation around a single provider: per-attempt timeout, retry with
// exponential backoff and jitter, a shared circuit breaker, and an empty-list
// fallback.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{FlightProvider, ProviderStats, ProviderStatsSnapshot};
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{ResilienceConfig, RetryConfig};
use crate::error::ProviderError;
use crate::model::{CanonicalFlight, SearchQuery};

pub struct ResilientProvider {
    inner: Arc<dyn FlightProvider>,
    breaker: CircuitBreaker,
    retry: RetryConfig,
    call_timeout: Duration,
    stats: ProviderStats,
}

/// Settles one admitted attempt with the breaker. An attempt that is dropped
/// before it settles (caller deadline hit) counts as a failure, so a
/// half-open trial slot is never leaked.
struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    settled: bool,
}

impl<'a> Attempt<'a> {
    fn success(mut self) {
        self.settled = true;
        self.breaker.success();
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.fail();
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.fail();
        }
    }
}

/// Settles one `search` call in the provider stats. A call dropped by the
/// caller's deadline, mid-attempt or mid-backoff, is recorded as failed.
struct Call<'a> {
    provider: &'a str,
    stats: &'a ProviderStats,
    settled: bool,
}

impl<'a> Call<'a> {
    fn start(provider: &'a str, stats: &'a ProviderStats) -> Self {
        stats.calls.fetch_add(1, Ordering::Relaxed);
        Self {
            provider,
            stats,
            settled: false,
        }
    }

    fn settle(mut self, counter: &AtomicUsize) {
        self.settled = true;
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for Call<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.stats.failed.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(provider = %self.provider, "provider call abandoned before completion");
        }
    }
}

impl ResilientProvider {
    pub fn new(inner: Arc<dyn FlightProvider>, config: &ResilienceConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(inner.name(), &config.circuit_breaker),
            inner,
            retry: config.retry.clone(),
            call_timeout: config.call_timeout(),
            stats: ProviderStats::default(),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn stats(&self) -> ProviderStatsSnapshot {
        self.stats.snapshot(self.inner.dropped_records())
    }

    /// Never fails. Any upstream problem ends in an empty list.
    pub async fn search(&self, query: &SearchQuery) -> Vec<CanonicalFlight> {
        let call = Call::start(self.name(), &self.stats);
        let max_attempts = self.retry.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            if !self.breaker.should_allow_call() {
                tracing::debug!(provider = %self.name(), "circuit open, skipping upstream");
                call.settle(&self.stats.short_circuited);
                return Vec::new();
            }

            let guard = Attempt {
                breaker: &self.breaker,
                settled: false,
            };

            let outcome = match tokio::time::timeout(self.call_timeout, self.inner.search(query))
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    self.stats.timed_out.fetch_add(1, Ordering::Relaxed);
                    Err(ProviderError::Timeout(self.call_timeout.as_millis() as u64))
                }
            };

            match outcome {
                Ok(flights) => {
                    guard.success();
                    tracing::debug!(
                        provider = %self.name(),
                        attempt,
                        results = flights.len(),
                        "provider call succeeded"
                    );
                    call.settle(&self.stats.succeeded);
                    return flights;
                }
                Err(e) => {
                    guard.fail();
                    tracing::warn!(
                        provider = %self.name(),
                        attempt,
                        error = %e,
                        "provider call failed"
                    );

                    if !e.is_retryable() || attempt == max_attempts {
                        break;
                    }

                    tokio::time::sleep(calculate_backoff(attempt - 1, &self.retry)).await;
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        call.settle(&self.stats.failed);
        Vec::new()
    }
}

/// Exponential backoff capped at `max_backoff_ms`, spread by up to
/// `jitter_factor` around the base to avoid synchronized retries.
pub fn calculate_backoff(retry_attempt: u32, config: &RetryConfig) -> Duration {
    let base_backoff_ms = (config.initial_backoff_ms as f64
        * config.backoff_multiplier.powf(retry_attempt as f64))
    .min(config.max_backoff_ms as f64);

    let jitter = rand::random::<f64>() * config.jitter_factor * base_backoff_ms;
    let backoff_ms = base_backoff_ms * (1.0 - config.jitter_factor / 2.0) + jitter;

    Duration::from_millis(backoff_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::BreakerState;
    use crate::config::CircuitBreakerConfig;
    use crate::provider::mock::{sample_flight, ScriptedProvider, Step};

    fn query() -> SearchQuery {
        SearchQuery::new("IST", "COV", "2026-11-20".parse().unwrap()).unwrap()
    }

    fn config(max_attempts: u32, failure_threshold: u32) -> ResilienceConfig {
        ResilienceConfig {
            call_timeout_ms: 1_000,
            retry: RetryConfig {
                max_attempts,
                initial_backoff_ms: 10,
                max_backoff_ms: 100,
                backoff_multiplier: 2.0,
                jitter_factor: 0.0,
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold,
                success_threshold: 1,
                open_duration_ms: 60_000,
                half_open_max_calls: 1,
            },
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failure_then_succeeds() {
        let scripted = Arc::new(
            ScriptedProvider::returning("provider-a", vec![sample_flight("TK1", Some(100.0), "provider-a")])
                .then(Step::Fail { retryable: true }),
        );
        let provider = ResilientProvider::new(scripted.clone(), &config(3, 10));

        let flights = provider.search(&query()).await;

        assert_eq!(flights.len(), 1);
        assert_eq!(scripted.calls(), 2);
        let stats = provider.stats();
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_failure_falls_back_immediately() {
        let scripted = Arc::new(ScriptedProvider::new(
            "provider-a",
            Step::Fail { retryable: false },
        ));
        let provider = ResilientProvider::new(scripted.clone(), &config(3, 10));

        assert!(provider.search(&query()).await.is_empty());
        assert_eq!(scripted.calls(), 1);
        assert_eq!(provider.stats().failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_fall_back_to_empty() {
        let scripted = Arc::new(ScriptedProvider::failing("provider-a"));
        let provider = ResilientProvider::new(scripted.clone(), &config(3, 10));

        assert!(provider.search(&query()).await.is_empty());
        assert_eq!(scripted.calls(), 3);
        let stats = provider.stats();
        assert_eq!(stats.retried, 2);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_failure() {
        let scripted = Arc::new(
            ScriptedProvider::returning("provider-a", vec![sample_flight("TK1", Some(1.0), "provider-a")])
                .with_delay(Duration::from_secs(5)),
        );
        let provider = ResilientProvider::new(scripted, &config(1, 10));

        assert!(provider.search(&query()).await.is_empty());
        let stats = provider.stats();
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_circuit_short_circuits_upstream() {
        let scripted = Arc::new(ScriptedProvider::failing("provider-a"));
        let provider = ResilientProvider::new(scripted.clone(), &config(1, 2));

        provider.search(&query()).await;
        provider.search(&query()).await;
        assert_eq!(provider.breaker().state(), BreakerState::Open);

        assert!(provider.search(&query()).await.is_empty());
        assert_eq!(scripted.calls(), 2);
        assert_eq!(provider.stats().short_circuited, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_attempt_is_settled_as_failure() {
        let scripted = Arc::new(
            ScriptedProvider::returning("provider-a", vec![])
                .with_delay(Duration::from_millis(500)),
        );
        let provider = ResilientProvider::new(scripted, &config(1, 1));

        let cancelled =
            tokio::time::timeout(Duration::from_millis(100), provider.search(&query())).await;
        assert!(cancelled.is_err());
        assert_eq!(provider.breaker().state(), BreakerState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_dropped_mid_attempt_counts_as_failed() {
        let scripted = Arc::new(
            ScriptedProvider::returning("provider-a", vec![sample_flight("TK1", Some(1.0), "provider-a")])
                .with_delay(Duration::from_secs(60)),
        );
        let provider = ResilientProvider::new(scripted.clone(), &config(3, 10));

        // First attempt times out at 1s, backoff 10ms, second attempt in flight at 1.5s.
        let dropped =
            tokio::time::timeout(Duration::from_millis(1_500), provider.search(&query())).await;
        assert!(dropped.is_err());

        assert_eq!(scripted.calls(), 2);
        let stats = provider.stats();
        assert_eq!(stats.calls, 1);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.retried, 1);
        assert_eq!(stats.succeeded, 0);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_dropped_during_backoff_is_not_a_retry() {
        let scripted = Arc::new(
            ScriptedProvider::returning("provider-a", vec![])
                .with_delay(Duration::from_secs(60)),
        );
        let provider = ResilientProvider::new(scripted.clone(), &config(3, 10));

        // Timed out at 1s, then dropped inside the 10ms backoff.
        let dropped =
            tokio::time::timeout(Duration::from_millis(1_005), provider.search(&query())).await;
        assert!(dropped.is_err());

        assert_eq!(scripted.calls(), 1);
        let stats = provider.stats();
        assert_eq!(stats.retried, 0);
        assert_eq!(stats.timed_out, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_breaker_cools_down_retries_and_closes() {
        let scripted = Arc::new(
            ScriptedProvider::returning("provider-a", vec![sample_flight("TK1", Some(1.0), "provider-a")])
                .then(Step::Fail { retryable: false })
                .then(Step::Fail { retryable: false }),
        );
        let provider = ResilientProvider::new(scripted.clone(), &config(1, 1));

        // Trip the breaker.
        assert!(provider.search(&query()).await.is_empty());
        assert_eq!(provider.breaker().state(), BreakerState::Open);

        // Still cooling down: upstream is not touched.
        tokio::time::advance(Duration::from_secs(59)).await;
        assert!(provider.search(&query()).await.is_empty());
        assert_eq!(scripted.calls(), 1);
        assert_eq!(provider.stats().short_circuited, 1);

        // Cool-down over: the trial call fails and the breaker re-opens.
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(provider.search(&query()).await.is_empty());
        assert_eq!(scripted.calls(), 2);
        assert_eq!(provider.breaker().state(), BreakerState::Open);

        // Second cool-down: the trial call succeeds and the breaker closes.
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(provider.search(&query()).await.len(), 1);
        assert_eq!(scripted.calls(), 3);
        assert!(provider.breaker().is_closed());

        let stats = provider.stats();
        assert_eq!(stats.calls, 4);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.short_circuited, 1);
        assert_eq!(stats.succeeded, 1);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 300,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        };
        assert_eq!(calculate_backoff(0, &retry), Duration::from_millis(100));
        assert_eq!(calculate_backoff(1, &retry), Duration::from_millis(200));
        assert_eq!(calculate_backoff(2, &retry), Duration::from_millis(300));
        assert_eq!(calculate_backoff(6, &retry), Duration::from_millis(300));
    }
}
