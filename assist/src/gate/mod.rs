//! Novelty gate in front of the recognition service.

pub mod ahash;
pub mod histogram;
pub mod traits;

use std::time::Duration;

use currency_assist_common::config::GateConfig;
use currency_assist_common::frame::Frame;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use self::ahash::AHashFingerprinter;
use self::histogram::HistogramFingerprinter;
use self::traits::{Fingerprint, Fingerprinter};

struct AdmittedScene {
    fingerprint: Fingerprint,
    at: Instant,
}

/// Decides which frames are worth a recognition call.
///
/// A frame is admitted only while nothing is in flight, and only if it differs
/// enough from the last *admitted* frame or `max_idle` has passed since that
/// admission. Admission marks the gate busy until [`release`](Self::release).
pub struct ChangeGate {
    fingerprinter: Box<dyn Fingerprinter>,
    novelty_threshold: f64,
    max_idle: Duration,
    last_admitted: Option<AdmittedScene>,
    in_flight: bool,
}

impl ChangeGate {
    pub fn new(
        fingerprinter: Box<dyn Fingerprinter>,
        novelty_threshold: f64,
        max_idle: Duration,
    ) -> Self {
        Self {
            fingerprinter,
            novelty_threshold,
            max_idle,
            last_admitted: None,
            in_flight: false,
        }
    }

    pub fn from_config(config: &GateConfig) -> Self {
        let fingerprinter: Box<dyn Fingerprinter> = match config.method.as_str() {
            "histogram" => Box::new(HistogramFingerprinter),
            _ => Box::new(AHashFingerprinter::new(config.hash_size)),
        };
        Self::new(fingerprinter, config.novelty_threshold, config.max_idle())
    }

    pub fn admit(&mut self, frame: &Frame) -> bool {
        if self.in_flight {
            debug!(seq = frame.seq, "recognition in flight, dropping frame");
            return false;
        }

        let Some(fingerprint) = self.fingerprinter.fingerprint(&frame.jpeg) else {
            warn!(
                seq = frame.seq,
                method = self.fingerprinter.name(),
                "failed to fingerprint frame, skipping"
            );
            return false;
        };

        let now = Instant::now();
        let admitted = match &self.last_admitted {
            None => {
                debug!(seq = frame.seq, "first frame, admitting unconditionally");
                true
            }
            Some(prev) => {
                let delta = prev.fingerprint.delta(&fingerprint);
                let idle = now.duration_since(prev.at);
                let novel = delta > self.novelty_threshold;
                let recheck = idle >= self.max_idle;
                debug!(
                    seq = frame.seq,
                    delta = format!("{:.3}", delta),
                    threshold = format!("{:.3}", self.novelty_threshold),
                    idle_ms = idle.as_millis() as u64,
                    novel,
                    recheck,
                    "novelty check"
                );
                if recheck && !novel {
                    info!(
                        seq = frame.seq,
                        idle_secs = idle.as_secs(),
                        "static scene, forcing re-check"
                    );
                }
                novel || recheck
            }
        };

        if admitted {
            self.last_admitted = Some(AdmittedScene { fingerprint, at: now });
            self.in_flight = true;
        }
        admitted
    }

    /// Mark the admitted frame's cycle as finished.
    pub fn release(&mut self) {
        self.in_flight = false;
    }

    #[cfg(test)]
    pub fn in_flight(&self) -> bool {
        self.in_flight
    }
}
