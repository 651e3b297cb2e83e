// Provider B: in-process inventory library.
//
// The library speaks its own shapes (`departure`/`arrival` instead of
// `origin`/`destination`) and is synchronous, so calls run on tokio's
// blocking pool.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::{parse_timestamp, FlightProvider};
use crate::error::{ConfigError, ProviderError};
use crate::model::{CanonicalFlight, SearchQuery};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AvailabilityRequest {
    pub departure: String,
    pub arrival: String,
    pub departure_date: NaiveDate,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AvailabilityResponse {
    #[serde(default)]
    pub has_error: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub flight_options: Vec<InventoryFlight>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InventoryFlight {
    pub flight_no: String,
    pub departure: String,
    pub arrival: String,
    #[serde(default)]
    pub departure_time: Option<String>,
    #[serde(default)]
    pub arrival_time: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
}

/// Blocking availability lookup exposed by the inventory library.
pub trait InventoryService: Send + Sync + 'static {
    fn availability(
        &self,
        request: &AvailabilityRequest,
    ) -> Result<AvailabilityResponse, ProviderError>;
}

impl<F> InventoryService for F
where
    F: Fn(&AvailabilityRequest) -> Result<AvailabilityResponse, ProviderError>
        + Send
        + Sync
        + 'static,
{
    fn availability(
        &self,
        request: &AvailabilityRequest,
    ) -> Result<AvailabilityResponse, ProviderError> {
        self(request)
    }
}

/// Fixed inventory, typically loaded from a JSON fixture.
#[derive(Debug, Clone, Default)]
pub struct StaticInventory {
    flights: Vec<InventoryFlight>,
}

impl StaticInventory {
    pub fn new(flights: Vec<InventoryFlight>) -> Self {
        Self { flights }
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let flights: Vec<InventoryFlight> = serde_json::from_str(json)?;
        Ok(Self::new(flights))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

impl InventoryService for StaticInventory {
    fn availability(
        &self,
        request: &AvailabilityRequest,
    ) -> Result<AvailabilityResponse, ProviderError> {
        let day = request.departure_date.format("%Y-%m-%d").to_string();
        let flight_options = self
            .flights
            .iter()
            .filter(|f| {
                f.departure.eq_ignore_ascii_case(&request.departure)
                    && f.arrival.eq_ignore_ascii_case(&request.arrival)
                    && f
                        .departure_time
                        .as_deref()
                        .map_or(false, |t| t.trim_start().starts_with(&day))
            })
            .cloned()
            .collect();

        Ok(AvailabilityResponse {
            has_error: false,
            error_message: None,
            flight_options,
        })
    }
}

pub struct InventoryProvider {
    name: String,
    service: Arc<dyn InventoryService>,
    dropped: AtomicUsize,
}

impl InventoryProvider {
    pub fn new(name: impl Into<String>, service: Arc<dyn InventoryService>) -> Self {
        Self {
            name: name.into(),
            service,
            dropped: AtomicUsize::new(0),
        }
    }

    fn normalize(&self, options: Vec<InventoryFlight>) -> Vec<CanonicalFlight> {
        options
            .into_iter()
            .filter_map(|option| match to_canonical(option, &self.name) {
                Ok(flight) => Some(flight),
                Err(reason) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(provider = %self.name, %reason, "dropping inventory flight");
                    None
                }
            })
            .collect()
    }
}

#[async_trait]
impl FlightProvider for InventoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<CanonicalFlight>, ProviderError> {
        let request = AvailabilityRequest {
            departure: query.origin().to_string(),
            arrival: query.destination().to_string(),
            departure_date: query.departure_date(),
        };

        let service = self.service.clone();
        let response =
            tokio::task::spawn_blocking(move || service.availability(&request)).await??;

        if response.has_error {
            return Err(ProviderError::Upstream {
                message: response
                    .error_message
                    .unwrap_or_else(|| "unspecified inventory error".to_string()),
                is_retryable: false,
            });
        }

        Ok(self.normalize(response.flight_options))
    }

    fn dropped_records(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn to_canonical(option: InventoryFlight, provider: &str) -> Result<CanonicalFlight, String> {
    if option.flight_no.trim().is_empty()
        || option.departure.trim().is_empty()
        || option.arrival.trim().is_empty()
    {
        return Err(format!("incomplete itinerary identity: {:?}", option));
    }

    let departure_time = option
        .departure_time
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or_else(|| {
            format!(
                "flight {}: bad departure time {:?}",
                option.flight_no, option.departure_time
            )
        })?;
    let arrival_time = option
        .arrival_time
        .as_deref()
        .and_then(parse_timestamp)
        .ok_or_else(|| {
            format!(
                "flight {}: bad arrival time {:?}",
                option.flight_no, option.arrival_time
            )
        })?;

    if let Some(price) = option.price {
        if !price.is_finite() || price < 0.0 {
            return Err(format!("flight {}: bad price {}", option.flight_no, price));
        }
    }

    Ok(CanonicalFlight {
        flight_number: option.flight_no.trim().to_string(),
        origin: option.departure.trim().to_string(),
        destination: option.arrival.trim().to_string(),
        departure_time: Some(departure_time),
        arrival_time: Some(arrival_time),
        quoted_price: option.price,
        source_provider: provider.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"[
        { "flight_no": "PC2001", "departure": "IST", "arrival": "COV",
          "departure_time": "2026-11-20T08:00:00", "arrival_time": "2026-11-20T11:00:00",
          "price": 300.0 },
        { "flight_no": "PC2002", "departure": "IST", "arrival": "COV",
          "departure_time": "2026-11-21T08:00:00", "arrival_time": "2026-11-21T11:00:00",
          "price": 250.0 },
        { "flight_no": "PC2003", "departure": "IST", "arrival": "ESB",
          "departure_time": "2026-11-20T09:00:00", "arrival_time": "2026-11-20T10:00:00",
          "price": 90.0 },
        { "flight_no": "PC2004", "departure": "IST", "arrival": "COV",
          "departure_time": "2026-11-20T20:00:00", "arrival_time": "2026-11-20T23:00:00" }
    ]"#;

    fn query() -> SearchQuery {
        SearchQuery::new("IST", "COV", "2026-11-20".parse().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_static_inventory_maps_departure_arrival() {
        let inventory = StaticInventory::from_json(FIXTURE).unwrap();
        let provider = InventoryProvider::new("provider-b", Arc::new(inventory));

        let flights = provider.search(&query()).await.unwrap();

        assert_eq!(flights.len(), 2);
        assert_eq!(flights[0].flight_number, "PC2001");
        assert_eq!(flights[0].origin, "IST");
        assert_eq!(flights[0].destination, "COV");
        assert_eq!(flights[0].quoted_price, Some(300.0));
        assert_eq!(flights[0].source_provider, "provider-b");
        assert_eq!(flights[1].quoted_price, None);
    }

    #[tokio::test]
    async fn test_malformed_times_are_dropped_not_invented() {
        let service = |_: &AvailabilityRequest| -> Result<AvailabilityResponse, ProviderError> {
            Ok(AvailabilityResponse {
                has_error: false,
                error_message: None,
                flight_options: vec![
                    InventoryFlight {
                        flight_no: "PC1".into(),
                        departure: "IST".into(),
                        arrival: "COV".into(),
                        departure_time: Some("2026-11-20T08:00:00".into()),
                        arrival_time: Some("2026-11-20T11:00:00".into()),
                        price: Some(100.0),
                    },
                    InventoryFlight {
                        flight_no: "PC2".into(),
                        departure: "IST".into(),
                        arrival: "COV".into(),
                        departure_time: Some("tomorrow morning".into()),
                        arrival_time: Some("2026-11-20T11:00:00".into()),
                        price: Some(100.0),
                    },
                    InventoryFlight {
                        flight_no: "PC3".into(),
                        departure: "IST".into(),
                        arrival: "COV".into(),
                        departure_time: Some("2026-11-20T08:00:00".into()),
                        arrival_time: None,
                        price: Some(100.0),
                    },
                    InventoryFlight {
                        flight_no: "PC4".into(),
                        departure: "IST".into(),
                        arrival: "COV".into(),
                        departure_time: Some("2026-11-20T08:00:00".into()),
                        arrival_time: Some("2026-11-20T11:00:00".into()),
                        price: Some(-5.0),
                    },
                ],
            })
        };
        let provider = InventoryProvider::new("provider-b", Arc::new(service));

        let flights = provider.search(&query()).await.unwrap();

        assert_eq!(flights.len(), 1);
        assert_eq!(flights[0].flight_number, "PC1");
        assert_eq!(provider.dropped_records(), 3);
    }

    #[tokio::test]
    async fn test_business_error_is_not_retryable() {
        let service = |_: &AvailabilityRequest| -> Result<AvailabilityResponse, ProviderError> {
            Ok(AvailabilityResponse {
                has_error: true,
                error_message: Some("inventory offline".into()),
                flight_options: vec![],
            })
        };
        let provider = InventoryProvider::new("provider-b", Arc::new(service));

        let err = provider.search(&query()).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("inventory offline"));
    }

    #[tokio::test]
    async fn test_library_panic_becomes_error() {
        let service = |_: &AvailabilityRequest| -> Result<AvailabilityResponse, ProviderError> {
            panic!("inventory library crashed")
        };
        let provider = InventoryProvider::new("provider-b", Arc::new(service));

        let err = provider.search(&query()).await.unwrap_err();
        assert!(matches!(err, ProviderError::TaskFailed(_)));
    }
}
