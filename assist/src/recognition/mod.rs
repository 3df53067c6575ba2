//! Remote note recognition: the service seam, the retrying client in front of
//! it, and the Gemini implementation.

pub mod breaker;
pub mod client;
pub mod gemini;

use std::fmt;

use async_trait::async_trait;

pub use breaker::CircuitBreaker;
pub use client::{RecognitionClient, RetryPolicy};

/// How sure the service is about a note, in its own vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    /// Lenient parse of the model's wording; unknown words are treated as low.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "high" => Confidence::High,
            "medium" => Confidence::Medium,
            _ => Confidence::Low,
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Confidence::High => "high",
            Confidence::Medium => "medium",
            Confidence::Low => "low",
        })
    }
}

/// What a single service round trip produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    Note {
        currency: String,
        denomination: f64,
        confidence: Confidence,
    },
    NoNote,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ServiceError {
    /// Timeouts, resets, 5xx. Worth retrying.
    #[error("transient service error: {0}")]
    Transient(String),
    /// Malformed request, auth, quota. Retrying will not help.
    #[error("service rejected request: {0}")]
    Rejected(String),
}

/// The remote vision service.
#[async_trait]
pub trait RecognitionService: Send + Sync {
    async fn detect(&self, jpeg: &[u8]) -> Result<Detection, ServiceError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FailureReason {
    CircuitOpen,
    Exhausted { attempts: u32, last_error: String },
    Rejected(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::CircuitOpen => f.write_str("circuit open"),
            FailureReason::Exhausted {
                attempts,
                last_error,
            } => write!(f, "gave up after {attempts} attempt(s): {last_error}"),
            FailureReason::Rejected(reason) => write!(f, "rejected: {reason}"),
        }
    }
}

/// Final answer for one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionResult {
    Identified {
        currency: String,
        denomination: f64,
        confidence: Confidence,
    },
    Unrecognized,
    Failed { reason: FailureReason },
}

impl RecognitionResult {
    /// Dedupe key for identified notes, e.g. `"INR 100"`.
    pub fn label(&self) -> Option<String> {
        match self {
            RecognitionResult::Identified {
                currency,
                denomination,
                ..
            } => Some(format!(
                "{} {}",
                currency.trim().to_uppercase(),
                format_denomination(*denomination)
            )),
            _ => None,
        }
    }

    /// The sentence spoken for an identified note.
    pub fn announcement(&self) -> Option<String> {
        match self {
            RecognitionResult::Identified {
                currency,
                denomination,
                confidence,
            } => Some(format!(
                "Detected {} {} with {} confidence.",
                format_denomination(*denomination),
                currency.trim(),
                confidence
            )),
            _ => None,
        }
    }
}

/// `100.0` prints as `100`, `0.5` stays `0.5`.
pub fn format_denomination(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}
