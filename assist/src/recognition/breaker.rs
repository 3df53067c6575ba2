use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open { until: Instant },
    HalfOpen,
}

/// Whether a call may go out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// Breaker closed: full retry budget.
    Call,
    /// First call after the open period: one attempt decides the state.
    Trial,
    Rejected { retry_in: Duration },
}

/// Stops calling a failing service for a cooldown period.
///
/// Counts consecutive failed calls; at `failure_threshold` the breaker opens
/// for `open_duration`. The first call after that is a trial: success closes
/// the breaker, failure re-opens it with a fresh timer.
pub struct CircuitBreaker {
    state: CircuitState,
    consecutive_failures: u32,
    failure_threshold: u32,
    open_duration: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, open_duration: Duration) -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            failure_threshold,
            open_duration,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> CircuitState {
        self.state
    }

    #[cfg(test)]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn acquire(&mut self) -> Permit {
        match self.state {
            CircuitState::Closed => Permit::Call,
            CircuitState::Open { until } => {
                let now = Instant::now();
                if now >= until {
                    info!("circuit OPEN→HALF-OPEN: allowing one trial call");
                    self.state = CircuitState::HalfOpen;
                    Permit::Trial
                } else {
                    Permit::Rejected {
                        retry_in: until - now,
                    }
                }
            }
            // The trial is still out.
            CircuitState::HalfOpen => Permit::Rejected {
                retry_in: Duration::ZERO,
            },
        }
    }

    pub fn record_success(&mut self) {
        if self.state != CircuitState::Closed {
            info!("circuit →CLOSED: service answered");
        }
        self.state = CircuitState::Closed;
        self.consecutive_failures = 0;
    }

    pub fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        match self.state {
            CircuitState::HalfOpen => {
                warn!("circuit HALF-OPEN→OPEN: trial call failed");
                self.open();
            }
            CircuitState::Closed if self.consecutive_failures >= self.failure_threshold => {
                warn!(
                    consecutive_failures = self.consecutive_failures,
                    open_secs = self.open_duration.as_secs_f64(),
                    "circuit CLOSED→OPEN: too many consecutive failures"
                );
                self.open();
            }
            _ => {}
        }
    }

    /// The service answered, but with no note or a refusal. Leaves the
    /// failure count alone; a trial that gets this far proves the service is
    /// back.
    pub fn record_neutral(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.record_success();
        }
    }

    /// A trial that never reported back counts as a failed one.
    pub fn abandon_trial(&mut self) {
        if self.state == CircuitState::HalfOpen {
            warn!("circuit HALF-OPEN→OPEN: trial call abandoned");
            self.consecutive_failures += 1;
            self.open();
        }
    }

    fn open(&mut self) {
        self.state = CircuitState::Open {
            until: Instant::now() + self.open_duration,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        for _ in 0..2 {
            assert_eq!(breaker.acquire(), Permit::Call);
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
        assert_eq!(
            breaker.acquire(),
            Permit::Rejected {
                retry_in: Duration::from_secs(30)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_count() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejections_do_not_count() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_neutral();
        breaker.record_neutral();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn neutral_answers_do_not_reset() {
        let mut breaker = CircuitBreaker::new(2, Duration::from_secs(30));
        breaker.record_failure();
        breaker.record_neutral();
        breaker.record_failure();
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_allows_exactly_one_trial() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure();

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.acquire(), Permit::Trial);
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(matches!(breaker.acquire(), Permit::Rejected { .. }));

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.acquire(), Permit::Call);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_with_fresh_timer() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(15)).await;

        assert_eq!(breaker.acquire(), Permit::Trial);
        breaker.record_failure();
        assert_eq!(
            breaker.acquire(),
            Permit::Rejected {
                retry_in: Duration::from_secs(10)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_trial_reopens() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.acquire(), Permit::Trial);

        breaker.abandon_trial();
        assert!(matches!(breaker.state(), CircuitState::Open { .. }));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.acquire(), Permit::Trial);
    }

    #[tokio::test(start_paused = true)]
    async fn abandon_outside_trial_is_ignored() {
        let mut breaker = CircuitBreaker::new(3, Duration::from_secs(10));
        breaker.abandon_trial();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_trial_closes() {
        let mut breaker = CircuitBreaker::new(1, Duration::from_secs(10));
        breaker.record_failure();
        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(breaker.acquire(), Permit::Trial);
        breaker.record_neutral();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }
}
