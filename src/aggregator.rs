// Concurrent fan-out to every registered provider, merge, then filter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::Semaphore;

use crate::cache::{QueryCache, FLIGHTS_NAMESPACE};
use crate::config::Settings;
use crate::error::AggregatorError;
use crate::filter::apply_filters;
use crate::model::{CanonicalFlight, SearchQuery};
use crate::provider::{FlightProvider, ResilientProvider};

pub struct FlightAggregator {
    providers: Vec<Arc<ResilientProvider>>,
    // Shared by all requests; bounds provider calls in flight process-wide.
    workers: Arc<Semaphore>,
    task_deadline: Duration,
    cache: QueryCache,
    ttl: Duration,
}

impl FlightAggregator {
    pub fn new(providers: Vec<Arc<dyn FlightProvider>>, settings: &Settings, cache: QueryCache) -> Self {
        let providers = providers
            .into_iter()
            .map(|provider| Arc::new(ResilientProvider::new(provider, &settings.resilience)))
            .collect();

        Self {
            providers,
            workers: Arc::new(Semaphore::new(settings.aggregator.worker_pool_size)),
            task_deadline: settings.aggregator.task_deadline(),
            cache,
            ttl: Duration::from_secs(settings.cache.flights_ttl_secs),
        }
    }

    pub fn providers(&self) -> &[Arc<ResilientProvider>] {
        &self.providers
    }

    /// Cached, filtered union of every provider's results. The only error is
    /// a cache infrastructure failure; total provider outage is an empty list.
    pub async fn search_all(&self, query: &SearchQuery) -> Result<Vec<CanonicalFlight>, AggregatorError> {
        self.cache
            .get_or_compute(FLIGHTS_NAMESPACE, &query.cache_key(), self.ttl, || async {
                Ok::<_, AggregatorError>(self.search_uncached(query).await)
            })
            .await
    }

    /// Fans out to all providers, waits for each to finish or hit its
    /// deadline, and filters the merged list. Never fails.
    pub async fn search_uncached(&self, query: &SearchQuery) -> Vec<CanonicalFlight> {
        let started = Instant::now();
        let shared_query = Arc::new(query.clone());

        let tasks = self.providers.iter().map(|provider| {
            let provider = provider.clone();
            let query = shared_query.clone();
            let workers = self.workers.clone();
            let deadline = self.task_deadline;
            let name = provider.name().to_string();

            // The deadline covers waiting for a worker as well as the call;
            // on expiry the in-flight call is dropped.
            let handle = tokio::spawn(async move {
                let work = async {
                    let _permit = workers.acquire_owned().await.ok()?;
                    Some(provider.search(&query).await)
                };

                match tokio::time::timeout(deadline, work).await {
                    Ok(Some(flights)) => flights,
                    Ok(None) => Vec::new(),
                    Err(_) => {
                        tracing::warn!(
                            provider = %provider.name(),
                            deadline_ms = deadline.as_millis() as u64,
                            "provider task deadline exceeded"
                        );
                        Vec::new()
                    }
                }
            });

            async move { (name, handle.await) }
        });

        let mut merged = Vec::new();
        for (name, result) in join_all(tasks).await {
            match result {
                Ok(flights) => merged.extend(flights),
                Err(e) => tracing::error!(provider = %name, error = %e, "provider task panicked"),
            }
        }

        let total = merged.len();
        let filtered = apply_filters(merged, query);

        tracing::info!(
            origin = %query.origin(),
            destination = %query.destination(),
            merged = total,
            returned = filtered.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "aggregated provider results"
        );

        filtered
    }
}
