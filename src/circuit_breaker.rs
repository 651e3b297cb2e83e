use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;

/// Per-provider breaker shared by every concurrent request to that provider.
///
/// All transitions happen under one short-lived lock, so a burst of failures
/// from concurrent callers is counted against a single view of the state.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    success_threshold: u32,
    half_open_max_calls: u32,
    open_duration: Duration,
    state: Mutex<State>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

enum State {
    Closed { failures: u32 },
    Open { opened_at: Instant },
    HalfOpen { successes: u32, in_flight: u32 },
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            failure_threshold: config.failure_threshold,
            success_threshold: config.success_threshold,
            half_open_max_calls: config.half_open_max_calls,
            open_duration: Duration::from_millis(config.open_duration_ms),
            state: Mutex::new(State::Closed { failures: 0 }),
        }
    }

    pub fn state(&self) -> BreakerState {
        match *self.state.lock() {
            State::Closed { .. } => BreakerState::Closed,
            State::Open { .. } => BreakerState::Open,
            State::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state() == BreakerState::Closed
    }

    /// Returns false while open. After the cool-down the breaker goes half-open
    /// and lets through at most `half_open_max_calls` trial calls at a time.
    pub fn should_allow_call(&self) -> bool {
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed { .. } => true,
            State::Open { opened_at } => {
                if opened_at.elapsed() >= self.open_duration {
                    tracing::info!(provider = %self.name, "circuit half-open, probing upstream");
                    *state = State::HalfOpen {
                        successes: 0,
                        in_flight: 1,
                    };
                    true
                } else {
                    false
                }
            }
            State::HalfOpen { in_flight, .. } => {
                if *in_flight < self.half_open_max_calls {
                    *in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn success(&self) {
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed { failures } => *failures = 0,
            State::HalfOpen {
                successes,
                in_flight,
            } => {
                *successes += 1;
                *in_flight = in_flight.saturating_sub(1);
                if *successes >= self.success_threshold {
                    tracing::info!(provider = %self.name, "circuit closed");
                    *state = State::Closed { failures: 0 };
                }
            }
            State::Open { .. } => {}
        }
    }

    pub fn fail(&self) {
        let mut state = self.state.lock();
        match &mut *state {
            State::Closed { failures } => {
                *failures += 1;
                if *failures >= self.failure_threshold {
                    tracing::warn!(
                        provider = %self.name,
                        failures = *failures,
                        "circuit opened"
                    );
                    *state = State::Open {
                        opened_at: Instant::now(),
                    };
                }
            }
            State::HalfOpen { .. } => {
                tracing::warn!(provider = %self.name, "trial call failed, circuit re-opened");
                *state = State::Open {
                    opened_at: Instant::now(),
                };
            }
            State::Open { .. } => {}
        }
    }

    /// Forces the breaker closed.
    pub fn reset(&self) {
        *self.state.lock() = State::Closed { failures: 0 };
    }
}
