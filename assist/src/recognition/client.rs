use std::ops::{Deref, DerefMut};
use std::time::Duration;

use currency_assist_common::config::RecognitionConfig;
use currency_assist_common::frame::Frame;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::breaker::{CircuitBreaker, CircuitState, Permit};
use super::{Detection, FailureReason, RecognitionResult, RecognitionService, ServiceError};

/// Attempt limit plus exponential backoff between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
}

impl RetryPolicy {
    /// Delay after the given (1-based) failed attempt: `base * 2^(attempt-1)`,
    /// capped.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// One frame's trip through the client.
struct RecognitionRequest<'a> {
    frame: &'a Frame,
    submitted_at: Instant,
    attempt: u32,
}

/// Borrow of the breaker for one call. Dropping it while a trial is still
/// out re-opens the breaker.
struct BreakerGuard<'a>(&'a mut CircuitBreaker);

impl Deref for BreakerGuard<'_> {
    type Target = CircuitBreaker;

    fn deref(&self) -> &CircuitBreaker {
        &*self.0
    }
}

impl DerefMut for BreakerGuard<'_> {
    fn deref_mut(&mut self) -> &mut CircuitBreaker {
        &mut *self.0
    }
}

impl Drop for BreakerGuard<'_> {
    fn drop(&mut self) {
        self.0.abandon_trial();
    }
}

/// Calls the recognition service with a per-attempt timeout, bounded retries
/// and a circuit breaker. One call at a time: `recognize` takes `&mut self`.
pub struct RecognitionClient {
    service: Box<dyn RecognitionService>,
    timeout: Duration,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
}

impl RecognitionClient {
    pub fn new(
        service: Box<dyn RecognitionService>,
        timeout: Duration,
        retry: RetryPolicy,
        breaker: CircuitBreaker,
    ) -> Self {
        Self {
            service,
            timeout,
            retry,
            breaker,
        }
    }

    pub fn from_config(service: Box<dyn RecognitionService>, config: &RecognitionConfig) -> Self {
        Self::new(
            service,
            config.timeout(),
            RetryPolicy {
                max_attempts: config.max_attempts,
                base: config.backoff_base(),
                cap: config.backoff_cap(),
            },
            CircuitBreaker::new(config.breaker_failure_threshold, config.breaker_open()),
        )
    }

    #[cfg(test)]
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub async fn recognize(&mut self, frame: &Frame) -> RecognitionResult {
        let max_attempts = match self.breaker.acquire() {
            Permit::Call => self.retry.max_attempts,
            Permit::Trial => 1,
            Permit::Rejected { retry_in } => {
                debug!(
                    seq = frame.seq,
                    retry_in_ms = retry_in.as_millis() as u64,
                    "circuit open, not calling service"
                );
                return RecognitionResult::Failed {
                    reason: FailureReason::CircuitOpen,
                };
            }
        };

        let mut breaker = BreakerGuard(&mut self.breaker);
        let mut request = RecognitionRequest {
            frame,
            submitted_at: Instant::now(),
            attempt: 0,
        };

        loop {
            request.attempt += 1;
            let call = self.service.detect(&request.frame.jpeg);
            let outcome = match tokio::time::timeout(self.timeout, call).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ServiceError::Transient(format!(
                    "timed out after {:?}",
                    self.timeout
                ))),
            };

            let last_error = match outcome {
                Ok(Detection::Note {
                    currency,
                    denomination,
                    confidence,
                }) => {
                    breaker.record_success();
                    info!(
                        seq = request.frame.seq,
                        currency,
                        denomination,
                        %confidence,
                        attempt = request.attempt,
                        elapsed_ms = request.submitted_at.elapsed().as_millis() as u64,
                        "note identified"
                    );
                    return RecognitionResult::Identified {
                        currency,
                        denomination,
                        confidence,
                    };
                }
                Ok(Detection::NoNote) => {
                    breaker.record_neutral();
                    debug!(
                        seq = request.frame.seq,
                        elapsed_ms = request.submitted_at.elapsed().as_millis() as u64,
                        "no note in frame"
                    );
                    return RecognitionResult::Unrecognized;
                }
                Err(ServiceError::Rejected(reason)) => {
                    breaker.record_neutral();
                    warn!(seq = request.frame.seq, reason, "service rejected request");
                    return RecognitionResult::Failed {
                        reason: FailureReason::Rejected(reason),
                    };
                }
                Err(ServiceError::Transient(reason)) => reason,
            };

            if request.attempt >= max_attempts {
                breaker.record_failure();
                warn!(
                    seq = request.frame.seq,
                    service = self.service.name(),
                    attempts = request.attempt,
                    error = last_error,
                    elapsed_ms = request.submitted_at.elapsed().as_millis() as u64,
                    "recognition failed"
                );
                return RecognitionResult::Failed {
                    reason: FailureReason::Exhausted {
                        attempts: request.attempt,
                        last_error,
                    },
                };
            }

            let delay = self.retry.delay_after(request.attempt);
            warn!(
                seq = request.frame.seq,
                attempt = request.attempt,
                error = last_error,
                "recognition attempt failed, retrying in {:?}",
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }
}
