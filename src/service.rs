// Entry points consumed by the transport layer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Serialize, Serializer};

use crate::aggregator::FlightAggregator;
use crate::audit::{AuditDispatcher, AuditRecord, AuditResponse};
use crate::cache::QueryCache;
use crate::cheapest::CheapestSelector;
use crate::config::Settings;
use crate::error::AggregatorError;
use crate::model::{CanonicalFlight, SearchQuery};
use crate::provider::FlightProvider;

pub const ALL_FLIGHTS_ENDPOINT: &str = "flights.all";
pub const CHEAPEST_FLIGHTS_ENDPOINT: &str = "flights.cheapest";

/// Outbound result envelope. Serialized prices are always numbers; an
/// unreported price is written as 0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightList {
    #[serde(serialize_with = "serialize_flights")]
    pub flights: Vec<CanonicalFlight>,
    pub total: usize,
    pub searched_at: DateTime<Utc>,
}

impl FlightList {
    fn new(flights: Vec<CanonicalFlight>) -> Self {
        Self {
            total: flights.len(),
            flights,
            searched_at: Utc::now(),
        }
    }
}

#[derive(Serialize)]
struct OutboundFlight<'a> {
    flight_number: &'a str,
    origin: &'a str,
    destination: &'a str,
    departure_time: Option<NaiveDateTime>,
    arrival_time: Option<NaiveDateTime>,
    price: f64,
    source_provider: &'a str,
}

#[allow(clippy::ptr_arg)]
fn serialize_flights<S: Serializer>(flights: &Vec<CanonicalFlight>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(flights.iter().map(|flight| OutboundFlight {
        flight_number: &flight.flight_number,
        origin: &flight.origin,
        destination: &flight.destination,
        departure_time: flight.departure_time,
        arrival_time: flight.arrival_time,
        price: flight.price(),
        source_provider: &flight.source_provider,
    }))
}

pub struct FlightSearchService {
    aggregator: Arc<FlightAggregator>,
    selector: CheapestSelector,
    audit: Option<AuditDispatcher>,
}

impl FlightSearchService {
    pub fn new(aggregator: Arc<FlightAggregator>, selector: CheapestSelector) -> Self {
        Self {
            aggregator,
            selector,
            audit: None,
        }
    }

    /// Wires the aggregator and selector over one shared cache.
    pub fn from_settings(
        settings: &Settings,
        providers: Vec<Arc<dyn FlightProvider>>,
        cache: QueryCache,
    ) -> Self {
        let aggregator = Arc::new(FlightAggregator::new(providers, settings, cache.clone()));
        let selector = CheapestSelector::new(
            aggregator.clone(),
            cache,
            Duration::from_secs(settings.cache.cheapest_ttl_secs),
        );
        Self::new(aggregator, selector)
    }

    pub fn with_audit(mut self, audit: AuditDispatcher) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn aggregator(&self) -> &FlightAggregator {
        &self.aggregator
    }

    pub async fn all_flights(&self, query: &SearchQuery) -> Result<FlightList, AggregatorError> {
        let started = Instant::now();
        let result = self.aggregator.search_all(query).await.map(FlightList::new);
        self.audit(ALL_FLIGHTS_ENDPOINT, query, &result, started);
        result
    }

    pub async fn cheapest_flights(&self, query: &SearchQuery) -> Result<FlightList, AggregatorError> {
        let started = Instant::now();
        let result = self.selector.select_cheapest(query).await.map(FlightList::new);
        self.audit(CHEAPEST_FLIGHTS_ENDPOINT, query, &result, started);
        result
    }

    fn audit(
        &self,
        endpoint: &str,
        query: &SearchQuery,
        result: &Result<FlightList, AggregatorError>,
        started: Instant,
    ) {
        let Some(audit) = &self.audit else {
            return;
        };

        // Serialization is left to the audit writer.
        let (status, response) = match result {
            Ok(list) => (200, AuditResponse::Flights(list.clone())),
            Err(e) => (
                500,
                AuditResponse::Error {
                    error: e.to_string(),
                },
            ),
        };

        audit.dispatch(AuditRecord {
            endpoint: endpoint.to_string(),
            request: query.clone(),
            response,
            status,
            duration_ms: started.elapsed().as_millis() as u64,
            recorded_at: Utc::now(),
        });
    }
}
