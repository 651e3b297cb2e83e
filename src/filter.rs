// In-memory filter pipeline applied to the merged provider results.

use chrono::NaiveDateTime;

use crate::model::{CanonicalFlight, SearchQuery};

/// Keeps the flights that satisfy every bound set on `query`.
///
/// With no bound set the input vector is handed back untouched, without
/// evaluating any predicate or reallocating.
pub fn apply_filters(flights: Vec<CanonicalFlight>, query: &SearchQuery) -> Vec<CanonicalFlight> {
    if !query.has_active_filters() {
        return flights;
    }

    let before = flights.len();
    let filtered: Vec<CanonicalFlight> = flights
        .into_iter()
        .filter(|flight| matches(flight, query))
        .collect();

    tracing::debug!(before, after = filtered.len(), "filters applied");
    filtered
}

/// All predicates joined with AND. Unset bounds always pass.
pub fn matches(flight: &CanonicalFlight, query: &SearchQuery) -> bool {
    price_ok(flight, query)
        && within(flight.departure_time, query.departure_from(), query.departure_to())
        && within(flight.arrival_time, query.arrival_from(), query.arrival_to())
}

// An unpriced flight never passes an active price bound, even though it reads
// as zero everywhere else.
fn price_ok(flight: &CanonicalFlight, query: &SearchQuery) -> bool {
    let (min, max) = (query.price_min(), query.price_max());
    if min.is_none() && max.is_none() {
        return true;
    }

    match flight.quoted_price {
        None => false,
        Some(price) => min.map_or(true, |min| price >= min) && max.map_or(true, |max| price <= max),
    }
}

// Inclusive on both ends; a missing timestamp fails any active bound.
fn within(
    value: Option<NaiveDateTime>,
    from: Option<NaiveDateTime>,
    to: Option<NaiveDateTime>,
) -> bool {
    if from.is_none() && to.is_none() {
        return true;
    }

    match value {
        None => false,
        Some(value) => from.map_or(true, |from| value >= from) && to.map_or(true, |to| value <= to),
    }
}
