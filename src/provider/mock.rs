// Scripted provider for tests and benchmarks

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use parking_lot::Mutex;

use super::FlightProvider;
use crate::error::ProviderError;
use crate::model::{CanonicalFlight, SearchQuery};

#[derive(Debug, Clone)]
pub enum Step {
    Flights(Vec<CanonicalFlight>),
    Fail { retryable: bool },
    Panic,
}

/// Plays queued steps in order, then repeats `fallback` forever.
pub struct ScriptedProvider {
    name: String,
    queue: Mutex<VecDeque<Step>>,
    fallback: Step,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(name: impl Into<String>, fallback: Step) -> Self {
        Self {
            name: name.into(),
            queue: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn returning(name: impl Into<String>, flights: Vec<CanonicalFlight>) -> Self {
        Self::new(name, Step::Flights(flights))
    }

    pub fn failing(name: impl Into<String>) -> Self {
        Self::new(name, Step::Fail { retryable: true })
    }

    pub fn then(self, step: Step) -> Self {
        self.queue.lock().push_back(step);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FlightProvider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn search(&self, _query: &SearchQuery) -> Result<Vec<CanonicalFlight>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let step = self
            .queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Flights(flights) => Ok(flights),
            Step::Fail { retryable } => Err(ProviderError::Upstream {
                message: "Service temporarily unavailable".to_string(),
                is_retryable: retryable,
            }),
            Step::Panic => panic!("scripted provider {} panicked", self.name),
        }
    }
}

/// Fixed-schedule flight used across tests: departs 10:00, lands 13:00.
pub fn sample_flight(flight_number: &str, price: Option<f64>, provider: &str) -> CanonicalFlight {
    sample_flight_at(flight_number, "2026-11-20T10:00:00", "2026-11-20T13:00:00", price, provider)
}

pub fn sample_flight_at(
    flight_number: &str,
    departure: &str,
    arrival: &str,
    price: Option<f64>,
    provider: &str,
) -> CanonicalFlight {
    let parse = |s: &str| s.parse::<NaiveDateTime>().ok();
    CanonicalFlight {
        flight_number: flight_number.to_string(),
        origin: "IST".to_string(),
        destination: "COV".to_string(),
        departure_time: parse(departure),
        arrival_time: parse(arrival),
        quoted_price: price,
        source_provider: provider.to_string(),
    }
}
