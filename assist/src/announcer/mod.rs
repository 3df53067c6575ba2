//! Speech output: keeps the audio sink connected and speaks one utterance at a
//! time.

pub mod sink;
pub mod speech;

use std::time::Duration;

use currency_assist_common::config::AnnouncerConfig;
use tracing::{info, warn};

use self::sink::{AudioSink, BluetoothSink, SinkState};
use self::speech::{EspeakEngine, SpeechEngine, SpeechError};

#[derive(Debug, thiserror::Error)]
pub enum AnnounceError {
    #[error("audio sink unavailable after {attempts} reconnect attempt(s)")]
    SinkUnavailable { attempts: u32 },
    #[error(transparent)]
    Speech(#[from] SpeechError),
}

pub struct Announcer {
    sink: Box<dyn AudioSink>,
    speech: Box<dyn SpeechEngine>,
    reconnect_attempts: u32,
    reconnect_backoff: Duration,
    last_state: Option<SinkState>,
}

impl Announcer {
    pub fn new(
        sink: Box<dyn AudioSink>,
        speech: Box<dyn SpeechEngine>,
        reconnect_attempts: u32,
        reconnect_backoff: Duration,
    ) -> Self {
        Self {
            sink,
            speech,
            reconnect_attempts,
            reconnect_backoff,
            last_state: None,
        }
    }

    pub fn from_config(config: &AnnouncerConfig) -> Self {
        Self::new(
            Box::new(BluetoothSink::new(config)),
            Box::new(EspeakEngine::new(config)),
            config.reconnect_attempts,
            config.reconnect_backoff(),
        )
    }

    /// Speak `text`, reconnecting the sink first if needed. Resolves when the
    /// utterance is done. If the sink cannot be brought back the text is
    /// dropped, not queued.
    pub async fn announce(&mut self, text: &str) -> Result<(), AnnounceError> {
        self.ensure_connected().await?;
        info!(engine = self.speech.name(), text, "announcing");
        self.speech.speak(text).await?;
        Ok(())
    }

    async fn ensure_connected(&mut self) -> Result<(), AnnounceError> {
        let state = self.sink.connection_state().await;
        self.observe(state);
        if state == SinkState::Connected {
            return Ok(());
        }

        let mut delay = self.reconnect_backoff;
        for attempt in 1..=self.reconnect_attempts {
            if self.sink.reconnect().await {
                info!(sink = self.sink.name(), attempt, "audio sink reconnected");
                self.observe(SinkState::Connected);
                return Ok(());
            }
            warn!(
                sink = self.sink.name(),
                attempt,
                max_attempts = self.reconnect_attempts,
                "audio sink reconnect failed"
            );
            if attempt < self.reconnect_attempts {
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
        }

        Err(AnnounceError::SinkUnavailable {
            attempts: self.reconnect_attempts,
        })
    }

    fn observe(&mut self, state: SinkState) {
        if self.last_state != Some(state) {
            match self.last_state {
                Some(prev) => info!(sink = self.sink.name(), "audio sink {prev}→{state}"),
                None => info!(sink = self.sink.name(), %state, "audio sink state"),
            }
            self.last_state = Some(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeSink, FakeSpeech};
    use tokio::time::Instant;

    fn announcer(sink: &FakeSink, speech: &FakeSpeech, attempts: u32) -> Announcer {
        Announcer::new(
            Box::new(sink.clone()),
            Box::new(speech.clone()),
            attempts,
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn connected_sink_speaks_directly() {
        let sink = FakeSink::connected();
        let speech = FakeSpeech::default();
        let mut announcer = announcer(&sink, &speech, 3);

        announcer.announce("Detected 100 INR with high confidence.").await.unwrap();
        assert_eq!(speech.spoken(), vec!["Detected 100 INR with high confidence."]);
        assert_eq!(sink.reconnect_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_before_speaking() {
        let sink = FakeSink::disconnected(vec![false, true]);
        let speech = FakeSpeech::default();
        let mut announcer = announcer(&sink, &speech, 3);

        let started = Instant::now();
        announcer.announce("hello").await.unwrap();
        assert_eq!(sink.reconnect_calls(), 2);
        assert_eq!(speech.spoken(), vec!["hello"]);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_attempt_limit_and_drops_text() {
        let sink = FakeSink::disconnected(vec![]);
        let speech = FakeSpeech::default();
        let mut announcer = announcer(&sink, &speech, 3);

        let started = Instant::now();
        let err = announcer.announce("lost").await.unwrap_err();
        assert!(matches!(err, AnnounceError::SinkUnavailable { attempts: 3 }));
        assert_eq!(sink.reconnect_calls(), 3);
        assert!(speech.spoken().is_empty());
        // 1s then 2s between the three attempts.
        assert_eq!(started.elapsed(), Duration::from_secs(3));

        // The headset comes back on its own: the next announcement goes out.
        sink.set_connected(true);
        announcer.announce("back").await.unwrap();
        assert_eq!(speech.spoken(), vec!["back"]);
        assert_eq!(sink.reconnect_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempts_drops_immediately() {
        let sink = FakeSink::disconnected(vec![true]);
        let speech = FakeSpeech::default();
        let mut announcer = announcer(&sink, &speech, 0);

        assert!(announcer.announce("x").await.is_err());
        assert_eq!(sink.reconnect_calls(), 0);
    }
}
