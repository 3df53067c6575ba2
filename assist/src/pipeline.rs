use std::fmt;
use std::time::Duration;

use currency_assist_camera::{LatestFrame, NextFrame};
use currency_assist_common::frame::Frame;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::announcer::Announcer;
use crate::archive::CaptureArchive;
use crate::cache::ResultCache;
use crate::gate::ChangeGate;
use crate::recognition::{RecognitionClient, RecognitionResult};

const FAILURE_NOTICE: &str = "Detection unavailable.";
const STALL_NOTICE: &str = "Camera unavailable.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    Admitted,
    Announcing,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PipelineState::Idle => "IDLE",
            PipelineState::Admitted => "ADMITTED",
            PipelineState::Announcing => "ANNOUNCING",
        })
    }
}

/// What one call to [`Pipeline::step`] did with its frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Not admitted by the gate.
    Dropped,
    Unrecognized,
    /// Identified, but already announced within the dedupe window.
    Suppressed,
    Announced(String),
    /// Identified and new, but the audio sink could not be reached.
    AnnouncementDropped(String),
    /// Recognition failed; `notified` says whether the audible notice went out.
    Failed { notified: bool },
}

/// Lets a notice through at most once per interval.
struct NoticeThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl NoticeThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn ready(&mut self) -> bool {
        let now = Instant::now();
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Gate → recognition → dedupe → speech, one frame at a time.
pub struct Pipeline {
    gate: ChangeGate,
    client: RecognitionClient,
    cache: ResultCache,
    announcer: Announcer,
    archive: Option<CaptureArchive>,
    state: PipelineState,
    failure_notice: NoticeThrottle,
    stall_notice: NoticeThrottle,
    stall_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        gate: ChangeGate,
        client: RecognitionClient,
        cache: ResultCache,
        announcer: Announcer,
        notice_interval: Duration,
        stall_timeout: Duration,
    ) -> Self {
        Self {
            gate,
            client,
            cache,
            announcer,
            archive: None,
            state: PipelineState::Idle,
            failure_notice: NoticeThrottle::new(notice_interval),
            stall_notice: NoticeThrottle::new(notice_interval),
            stall_timeout,
        }
    }

    pub fn with_archive(mut self, archive: CaptureArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    #[cfg(test)]
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Run one frame through the state machine.
    pub async fn step(&mut self, frame: &Frame) -> Outcome {
        if self.state != PipelineState::Idle {
            // The previous step's future was dropped mid-cycle.
            warn!(state = %self.state, "previous cycle was interrupted, resetting");
            self.gate.release();
            self.transition(PipelineState::Idle, frame.seq);
        }

        if !self.gate.admit(frame) {
            return Outcome::Dropped;
        }
        self.transition(PipelineState::Admitted, frame.seq);

        if let Some(archive) = self.archive.as_mut() {
            if let Err(e) = archive.store(frame).await {
                warn!(seq = frame.seq, error = %e, "failed to archive frame");
            }
        }

        let result = self.client.recognize(frame).await;
        let outcome = match &result {
            RecognitionResult::Identified { .. } => {
                self.handle_identified(&result, frame.seq).await
            }
            RecognitionResult::Unrecognized => Outcome::Unrecognized,
            RecognitionResult::Failed { reason } => {
                warn!(seq = frame.seq, %reason, "detection unavailable");
                let notified = self.failure_notice.ready();
                if notified {
                    self.say(FAILURE_NOTICE).await;
                } else {
                    debug!(seq = frame.seq, "failure notice throttled");
                }
                Outcome::Failed { notified }
            }
        };

        self.gate.release();
        self.transition(PipelineState::Idle, frame.seq);
        outcome
    }

    async fn handle_identified(&mut self, result: &RecognitionResult, seq: u64) -> Outcome {
        if !self.cache.should_announce(result) {
            return Outcome::Suppressed;
        }
        let Some(text) = result.announcement() else {
            return Outcome::Suppressed;
        };

        self.transition(PipelineState::Announcing, seq);
        match self.announcer.announce(&text).await {
            Ok(()) => Outcome::Announced(text),
            Err(e) => {
                warn!(seq, error = %e, text, "announcement dropped");
                // Not heard, so not a duplicate next time.
                self.cache.forget(result);
                Outcome::AnnouncementDropped(text)
            }
        }
    }

    /// Pull frames from the slot until the capture side shuts down.
    pub async fn run(&mut self, frames: &mut LatestFrame) {
        info!(stall_timeout = ?self.stall_timeout, "pipeline started");
        loop {
            match frames.next_within(self.stall_timeout).await {
                NextFrame::Frame(frame) => {
                    let outcome = self.step(&frame).await;
                    debug!(seq = frame.seq, ?outcome, "frame processed");
                }
                NextFrame::Stalled => {
                    warn!(
                        timeout_secs = self.stall_timeout.as_secs(),
                        "no new frame from camera"
                    );
                    if self.stall_notice.ready() {
                        self.say(STALL_NOTICE).await;
                    }
                }
                NextFrame::Closed => {
                    info!("capture stopped, pipeline exiting");
                    break;
                }
            }
        }
    }

    /// Speak a system message. Empty text is skipped; failures are logged.
    pub async fn say(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Err(e) = self.announcer.announce(text).await {
            warn!(error = %e, text, "system message dropped");
        }
    }

    fn transition(&mut self, to: PipelineState, seq: u64) {
        if self.state != to {
            info!(seq, "pipeline {}→{}", self.state, to);
            self.state = to;
        }
    }
}
