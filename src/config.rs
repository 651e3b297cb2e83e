// Runtime settings for the aggregation core.
//
// Every section has defaults, so an empty JSON object is a valid configuration.

use std::{path::Path, time::Duration};

use serde::Deserialize;

use crate::error::ConfigError;

/// Cached results older than a day are never useful for availability.
pub const MAX_CACHE_TTL_SECS: u64 = 86_400;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub aggregator: AggregatorConfig,
    pub resilience: ResilienceConfig,
    pub cache: CacheConfig,
    pub soap_provider: SoapProviderConfig,
    pub inventory_provider: InventoryProviderConfig,
    pub logging: LoggingConfig,
    pub audit: AuditConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// Upper bound on provider calls in flight across all requests.
    pub worker_pool_size: usize,
    pub task_deadline_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            task_deadline_ms: 10_000,
        }
    }
}

impl AggregatorConfig {
    pub fn task_deadline(&self) -> Duration {
        Duration::from_millis(self.task_deadline_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub call_timeout_ms: u64,
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 3_000,
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl ResilienceConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Longest a provider call can take when its first attempt times out and
    /// one retry follows after the largest jittered backoff.
    pub fn first_retry_budget_ms(&self) -> u64 {
        if self.retry.max_attempts < 2 {
            return self.call_timeout_ms;
        }
        let backoff = self.retry.initial_backoff_ms.min(self.retry.max_backoff_ms) as f64
            * (1.0 + self.retry.jitter_factor / 2.0);
        self.call_timeout_ms
            .saturating_mul(2)
            .saturating_add(backoff.ceil() as u64)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_duration_ms: u64,
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            open_duration_ms: 30_000,
            half_open_max_calls: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub flights_ttl_secs: u64,
    pub cheapest_ttl_secs: u64,
    pub purge_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            flights_ttl_secs: 300,
            cheapest_ttl_secs: 300,
            purge_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SoapProviderConfig {
    pub name: String,
    pub endpoint: String,
    pub soap_action: String,
}

impl Default for SoapProviderConfig {
    fn default() -> Self {
        Self {
            name: "provider-a".to_string(),
            endpoint: "http://localhost:8081/ws/flights".to_string(),
            soap_action: "availabilitySearch".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InventoryProviderConfig {
    pub name: String,
    /// JSON inventory loaded into the in-process provider.
    pub fixture_path: Option<String>,
}

impl Default for InventoryProviderConfig {
    fn default() -> Self {
        Self {
            name: "provider-b".to_string(),
            fixture_path: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
        }
    }
}

impl Settings {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregator.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "aggregator.worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.aggregator.task_deadline_ms == 0 || self.resilience.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        let retry = &self.resilience.retry;
        if retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "resilience.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "resilience.retry.backoff_multiplier must be >= 1.0, got {}",
                retry.backoff_multiplier
            )));
        }
        if !(0.0..=1.0).contains(&retry.jitter_factor) {
            return Err(ConfigError::Invalid(format!(
                "resilience.retry.jitter_factor must be within [0, 1], got {}",
                retry.jitter_factor
            )));
        }

        let budget = self.resilience.first_retry_budget_ms();
        if self.aggregator.task_deadline_ms < budget {
            return Err(ConfigError::Invalid(format!(
                "aggregator.task_deadline_ms ({}) must cover a timed-out call plus one retry ({}ms)",
                self.aggregator.task_deadline_ms, budget
            )));
        }

        let breaker = &self.resilience.circuit_breaker;
        if breaker.failure_threshold == 0
            || breaker.success_threshold == 0
            || breaker.half_open_max_calls == 0
        {
            return Err(ConfigError::Invalid(
                "circuit breaker thresholds must be at least 1".to_string(),
            ));
        }

        for (field, ttl) in [
            ("cache.flights_ttl_secs", self.cache.flights_ttl_secs),
            ("cache.cheapest_ttl_secs", self.cache.cheapest_ttl_secs),
        ] {
            if ttl > MAX_CACHE_TTL_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{field} must be at most {MAX_CACHE_TTL_SECS}, got {ttl}"
                )));
            }
        }

        if self.cache.purge_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache.purge_interval_secs must be at least 1".to_string(),
            ));
        }

        if self.audit.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "audit.queue_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
