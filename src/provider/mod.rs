// Upstream flight providers.
//
// Each upstream implements `FlightProvider` and owns the translation between
// its own wire shapes and `CanonicalFlight`. The orchestrator only ever sees
// providers through `ResilientProvider`, which never fails.

pub mod inventory;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod resilient;
pub mod soap;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::error::ProviderError;
use crate::model::{CanonicalFlight, SearchQuery};

pub use inventory::{InventoryProvider, InventoryService, StaticInventory};
pub use resilient::ResilientProvider;
pub use soap::{HttpSoapTransport, SoapProvider, SoapTransport};

#[async_trait]
pub trait FlightProvider: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// One raw upstream call. Errors are absorbed by `ResilientProvider`.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<CanonicalFlight>, ProviderError>;

    /// Upstream records discarded during mapping because they could not be
    /// normalized (bad timestamps, negative prices, missing identity).
    fn dropped_records(&self) -> usize {
        0
    }
}

/// Per-provider counters, shared by all requests.
#[derive(Debug, Default)]
pub struct ProviderStats {
    pub calls: AtomicUsize,
    pub succeeded: AtomicUsize,
    pub failed: AtomicUsize,
    pub retried: AtomicUsize,
    pub timed_out: AtomicUsize,
    pub short_circuited: AtomicUsize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderStatsSnapshot {
    pub calls: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub retried: usize,
    pub timed_out: usize,
    pub short_circuited: usize,
    pub dropped_records: usize,
}

impl ProviderStats {
    pub fn snapshot(&self, dropped_records: usize) -> ProviderStatsSnapshot {
        ProviderStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
            dropped_records,
        }
    }
}

/// Upstream timestamps come in a few ISO-8601 flavours; anything else is
/// treated as malformed and the record is dropped by the caller.
pub(crate) fn parse_timestamp(raw: &str) -> Option<chrono::NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    raw.parse::<chrono::NaiveDateTime>()
        .ok()
        .or_else(|| chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").ok())
        .or_else(|| {
            chrono::DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|dt| dt.naive_local())
        })
}
