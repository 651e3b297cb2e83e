// Flight search aggregation across independent upstream providers

pub mod aggregator;
pub mod audit;
pub mod cache;
pub mod cheapest;
pub mod circuit_breaker;
pub mod config;
pub mod error;
pub mod filter;
pub mod model;
pub mod provider;
pub mod service;
pub mod telemetry;

// Re-export key types for convenience
pub use aggregator::FlightAggregator;
pub use audit::{AuditDispatcher, AuditRecord, AuditResponse, AuditSink, TracingAuditSink};
pub use cache::{CacheBackend, CacheStats, QueryCache, TtlCache};
pub use cheapest::{cheapest_per_group, CheapestSelector};
pub use circuit_breaker::{BreakerState, CircuitBreaker};
pub use config::Settings;
pub use error::{AggregatorError, AuditError, CacheError, ConfigError, ProviderError, QueryError};
pub use filter::apply_filters;
pub use model::{CanonicalFlight, SearchQuery};
pub use provider::{FlightProvider, ResilientProvider};
pub use service::{FlightList, FlightSearchService};
