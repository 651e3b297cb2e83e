// Cheapest offer per itinerary.

use std::cmp::Ordering;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::aggregator::FlightAggregator;
use crate::cache::{QueryCache, CHEAPEST_NAMESPACE};
use crate::error::AggregatorError;
use crate::model::{compare_price, CanonicalFlight, GroupKey, SearchQuery};

pub struct CheapestSelector {
    aggregator: Arc<FlightAggregator>,
    cache: QueryCache,
    ttl: Duration,
}

impl CheapestSelector {
    pub fn new(aggregator: Arc<FlightAggregator>, cache: QueryCache, ttl: Duration) -> Self {
        Self {
            aggregator,
            cache,
            ttl,
        }
    }

    /// One flight per (number, origin, destination, departure, arrival)
    /// group, ascending by price. Cached separately from the full listing.
    pub async fn select_cheapest(&self, query: &SearchQuery) -> Result<Vec<CanonicalFlight>, AggregatorError> {
        self.cache
            .get_or_compute(CHEAPEST_NAMESPACE, &query.cache_key(), self.ttl, || async {
                let flights = self.aggregator.search_all(query).await?;
                Ok::<_, AggregatorError>(cheapest_per_group(flights))
            })
            .await
    }
}

/// Keeps the lowest-priced member of each group and sorts the survivors by
/// price. Ties keep the first-seen flight; unpriced flights sort last.
pub fn cheapest_per_group(flights: Vec<CanonicalFlight>) -> Vec<CanonicalFlight> {
    let mut slots: HashMap<GroupKey, usize> = HashMap::with_capacity(flights.len());
    let mut winners: Vec<CanonicalFlight> = Vec::with_capacity(flights.len());

    for flight in flights {
        match slots.entry(flight.group_key()) {
            Entry::Occupied(slot) => {
                let current = &mut winners[*slot.get()];
                if compare_price(flight.quoted_price, current.quoted_price) == Ordering::Less {
                    *current = flight;
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(winners.len());
                winners.push(flight);
            }
        }
    }

    // Stable: equal prices stay in first-seen group order.
    winners.sort_by(|a, b| compare_price(a.quoted_price, b.quoted_price));
    winners
}
