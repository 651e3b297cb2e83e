// Provider-agnostic flight records and the search query value object

use std::cmp::Ordering;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Placeholder written into cache keys for optional fields that are not set.
const UNSET: &str = "~";

/// Normalized flight record, identical in shape whatever provider produced it.
///
/// Times are provider-local wall-clock values; no timezone conversion is applied.
/// `price` is `None` when the provider did not report one. Callers that need a
/// number use [`CanonicalFlight::price`], which reads a missing price as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalFlight {
    pub flight_number: String,
    pub origin: String,
    pub destination: String,
    pub departure_time: Option<NaiveDateTime>,
    pub arrival_time: Option<NaiveDateTime>,
    #[serde(rename = "price")]
    pub quoted_price: Option<f64>,
    pub source_provider: String,
}

impl CanonicalFlight {
    pub fn new(
        flight_number: impl Into<String>,
        origin: impl Into<String>,
        destination: impl Into<String>,
        departure_time: NaiveDateTime,
        arrival_time: NaiveDateTime,
        price: Option<f64>,
        source_provider: impl Into<String>,
    ) -> Self {
        Self {
            flight_number: flight_number.into(),
            origin: origin.into(),
            destination: destination.into(),
            departure_time: Some(departure_time),
            arrival_time: Some(arrival_time),
            quoted_price: price,
            source_provider: source_provider.into(),
        }
    }

    pub fn price(&self) -> f64 {
        self.quoted_price.unwrap_or(0.0)
    }

    pub fn group_key(&self) -> GroupKey {
        GroupKey {
            flight_number: self.flight_number.clone(),
            origin: self.origin.clone(),
            destination: self.destination.clone(),
            departure_time: self.departure_time,
            arrival_time: self.arrival_time,
        }
    }
}

/// Itinerary identity. Provider and price are not part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupKey {
    pub flight_number: String,
    pub origin: String,
    pub destination: String,
    pub departure_time: Option<NaiveDateTime>,
    pub arrival_time: Option<NaiveDateTime>,
}

/// Ascending by price with unpriced flights last.
pub fn compare_price(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Immutable search request. Required fields are checked on construction; the
/// optional bounds are set through the `with_*` methods and are all inclusive.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchQuery {
    origin: String,
    destination: String,
    departure_date: NaiveDate,
    price_min: Option<f64>,
    price_max: Option<f64>,
    departure_from: Option<NaiveDateTime>,
    departure_to: Option<NaiveDateTime>,
    arrival_from: Option<NaiveDateTime>,
    arrival_to: Option<NaiveDateTime>,
}

impl SearchQuery {
    pub fn new(
        origin: impl Into<String>,
        destination: impl Into<String>,
        departure_date: NaiveDate,
    ) -> Result<Self, QueryError> {
        let origin = origin.into().trim().to_uppercase();
        let destination = destination.into().trim().to_uppercase();

        if origin.is_empty() {
            return Err(QueryError::MissingRequiredField("origin"));
        }
        if destination.is_empty() {
            return Err(QueryError::MissingRequiredField("destination"));
        }

        Ok(Self {
            origin,
            destination,
            departure_date,
            price_min: None,
            price_max: None,
            departure_from: None,
            departure_to: None,
            arrival_from: None,
            arrival_to: None,
        })
    }

    pub fn with_price_min(mut self, min: f64) -> Self {
        self.price_min = Some(min);
        self
    }

    pub fn with_price_max(mut self, max: f64) -> Self {
        self.price_max = Some(max);
        self
    }

    pub fn with_departure_window(
        mut self,
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> Self {
        self.departure_from = from;
        self.departure_to = to;
        self
    }

    pub fn with_arrival_window(
        mut self,
        from: Option<NaiveDateTime>,
        to: Option<NaiveDateTime>,
    ) -> Self {
        self.arrival_from = from;
        self.arrival_to = to;
        self
    }

    /// The future-date rule belongs to request validation; this helper lets
    /// the caller run it against its own notion of "today".
    pub fn ensure_future(&self, today: NaiveDate) -> Result<(), QueryError> {
        if self.departure_date > today {
            Ok(())
        } else {
            Err(QueryError::DateNotInFuture(self.departure_date))
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn departure_date(&self) -> NaiveDate {
        self.departure_date
    }

    pub fn price_min(&self) -> Option<f64> {
        self.price_min
    }

    pub fn price_max(&self) -> Option<f64> {
        self.price_max
    }

    pub fn departure_from(&self) -> Option<NaiveDateTime> {
        self.departure_from
    }

    pub fn departure_to(&self) -> Option<NaiveDateTime> {
        self.departure_to
    }

    pub fn arrival_from(&self) -> Option<NaiveDateTime> {
        self.arrival_from
    }

    pub fn arrival_to(&self) -> Option<NaiveDateTime> {
        self.arrival_to
    }

    pub fn has_active_filters(&self) -> bool {
        self.price_min.is_some()
            || self.price_max.is_some()
            || self.departure_from.is_some()
            || self.departure_to.is_some()
            || self.arrival_from.is_some()
            || self.arrival_to.is_some()
    }

    /// Deterministic key over every field in a fixed order.
    pub fn cache_key(&self) -> String {
        fn opt<T: ToString>(value: Option<T>) -> String {
            value.map_or_else(|| UNSET.to_string(), |v| v.to_string())
        }

        [
            self.origin.clone(),
            self.destination.clone(),
            self.departure_date.to_string(),
            opt(self.price_min),
            opt(self.price_max),
            opt(self.departure_from),
            opt(self.departure_to),
            opt(self.arrival_from),
            opt(self.arrival_to),
        ]
        .join("|")
    }
}
