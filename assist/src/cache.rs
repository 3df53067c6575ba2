//! Suppresses repeat announcements of the same note within a time window.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::recognition::RecognitionResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub label: String,
    pub last_announced: Instant,
    pub repeat_count: u32,
}

pub struct ResultCache {
    window: Duration,
    entries: HashMap<String, CacheEntry>,
}

impl ResultCache {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: HashMap::new(),
        }
    }

    /// True if `result` is an identified note that was not announced within
    /// the window. Anything else returns false and leaves the cache alone.
    pub fn should_announce(&mut self, result: &RecognitionResult) -> bool {
        let Some(label) = result.label() else {
            return false;
        };

        let now = Instant::now();
        self.evict_expired(now);

        if let Some(entry) = self.entries.get_mut(&label) {
            entry.repeat_count += 1;
            debug!(
                label = entry.label,
                repeat_count = entry.repeat_count,
                age_ms = now.duration_since(entry.last_announced).as_millis() as u64,
                "duplicate within dedupe window, suppressing"
            );
            return false;
        }

        self.entries.insert(
            label.clone(),
            CacheEntry {
                label,
                last_announced: now,
                repeat_count: 0,
            },
        );
        true
    }

    /// Drop the entry for `result`, so the next sighting is announced again.
    /// Used when an announcement could not be delivered.
    pub fn forget(&mut self, result: &RecognitionResult) {
        if let Some(label) = result.label() {
            self.entries.remove(&label);
        }
    }

    #[cfg(test)]
    pub fn entry(&self, label: &str) -> Option<&CacheEntry> {
        self.entries.get(label)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict_expired(&mut self, now: Instant) {
        let window = self.window;
        let before = self.entries.len();
        self.entries.retain(|_, entry| now.duration_since(entry.last_announced) < window);
        let evicted = before - self.entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = self.entries.len(), "evicted expired cache entries");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognition::{Confidence, FailureReason};

    const WINDOW: Duration = Duration::from_secs(10);

    fn note(currency: &str, denomination: f64) -> RecognitionResult {
        RecognitionResult::Identified {
            currency: currency.into(),
            denomination,
            confidence: Confidence::High,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_within_window_is_announced_once() {
        let mut cache = ResultCache::new(WINDOW);
        let inr = note("INR", 100.0);
        let mut announced = 0;

        // Sightings at t = 0, W/2 and 3W/2.
        for step in [Duration::ZERO, WINDOW / 2, WINDOW] {
            tokio::time::advance(step).await;
            if cache.should_announce(&inr) {
                announced += 1;
            }
        }
        assert_eq!(announced, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_count_tracks_suppressions() {
        let mut cache = ResultCache::new(WINDOW);
        assert!(cache.should_announce(&note("INR", 100.0)));
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(!cache.should_announce(&note("inr", 100.0)));
        assert!(!cache.should_announce(&note("INR", 100.0)));
        assert_eq!(cache.entry("INR 100").unwrap().repeat_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn window_boundary_is_exclusive() {
        let mut cache = ResultCache::new(WINDOW);
        assert!(cache.should_announce(&note("USD", 20.0)));
        tokio::time::advance(WINDOW).await;
        assert!(cache.should_announce(&note("USD", 20.0)));
        assert_eq!(cache.entry("USD 20").unwrap().repeat_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn different_notes_do_not_suppress_each_other() {
        let mut cache = ResultCache::new(WINDOW);
        assert!(cache.should_announce(&note("INR", 100.0)));
        assert!(cache.should_announce(&note("INR", 500.0)));
        assert!(cache.should_announce(&note("USD", 100.0)));
        assert_eq!(cache.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_identified_results_bypass() {
        let mut cache = ResultCache::new(WINDOW);
        assert!(!cache.should_announce(&RecognitionResult::Unrecognized));
        assert!(!cache.should_announce(&RecognitionResult::Failed {
            reason: FailureReason::CircuitOpen
        }));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_are_evicted_on_lookup() {
        let mut cache = ResultCache::new(WINDOW);
        cache.should_announce(&note("INR", 100.0));
        cache.should_announce(&note("INR", 200.0));
        tokio::time::advance(WINDOW * 2).await;
        cache.should_announce(&note("EUR", 5.0));
        assert_eq!(cache.len(), 1);
        assert!(cache.entry("INR 100").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn forgotten_note_is_announced_again() {
        let mut cache = ResultCache::new(WINDOW);
        let inr = note("INR", 100.0);
        assert!(cache.should_announce(&inr));
        cache.forget(&inr);
        assert!(cache.should_announce(&inr));
    }
}
