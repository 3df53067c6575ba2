//! Fakes and fixture frames shared by the unit tests.

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use currency_assist_common::frame::{Frame, Resolution};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::announcer::sink::{AudioSink, SinkState};
use crate::announcer::speech::{SpeechEngine, SpeechError};
use crate::recognition::{Confidence, Detection, RecognitionService, ServiceError};

const SIZE: u32 = 64;
const DARK: u8 = 20;
const BRIGHT: u8 = 230;

#[derive(Debug, Clone, Copy)]
pub enum Pattern {
    LeftBright,
    TopBright,
    Solid(u8),
}

pub fn jpeg(pattern: Pattern) -> Vec<u8> {
    let img = RgbImage::from_fn(SIZE, SIZE, |x, y| {
        let v = match pattern {
            Pattern::LeftBright if x < SIZE / 2 => BRIGHT,
            Pattern::TopBright if y < SIZE / 2 => BRIGHT,
            Pattern::LeftBright | Pattern::TopBright => DARK,
            Pattern::Solid(v) => v,
        };
        Rgb([v, v, v])
    });
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Jpeg)
        .unwrap();
    buf
}

pub fn frame(seq: u64, pattern: Pattern) -> Frame {
    Frame::new(
        jpeg(pattern),
        1_708_302_400_000 + seq as i64 * 1000,
        seq,
        Resolution::new(SIZE, SIZE),
    )
    .unwrap()
}

/// One scripted service response.
#[derive(Debug, Clone)]
pub enum Step {
    Note {
        currency: String,
        denomination: f64,
        confidence: Confidence,
    },
    NoNote,
    Transient,
    Rejected,
    /// Never answers; only a timeout gets the caller out.
    Hang,
}

impl Step {
    pub fn note(currency: &str, denomination: f64) -> Self {
        Step::Note {
            currency: currency.to_string(),
            denomination,
            confidence: Confidence::High,
        }
    }
}

#[derive(Default)]
struct ServiceInner {
    script: Mutex<VecDeque<Step>>,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a ServiceInner);

impl<'a> InFlight<'a> {
    fn enter(inner: &'a ServiceInner) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(inner)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Plays back a fixed list of responses; a spent script answers `Transient`.
#[derive(Clone)]
pub struct ScriptedService {
    inner: Arc<ServiceInner>,
    latency: Duration,
}

impl ScriptedService {
    pub fn new(script: Vec<Step>) -> Self {
        let inner = ServiceInner {
            script: Mutex::new(script.into()),
            ..ServiceInner::default()
        };
        Self {
            inner: Arc::new(inner),
            latency: Duration::ZERO,
        }
    }

    /// Every answer takes this long.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecognitionService for ScriptedService {
    async fn detect(&self, _jpeg: &[u8]) -> Result<Detection, ServiceError> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(&self.inner);
        let step = self
            .inner
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Step::Transient);

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match step {
            Step::Note {
                currency,
                denomination,
                confidence,
            } => Ok(Detection::Note {
                currency,
                denomination,
                confidence,
            }),
            Step::NoNote => Ok(Detection::NoNote),
            Step::Transient => Err(ServiceError::Transient("scripted outage".into())),
            Step::Rejected => Err(ServiceError::Rejected("scripted refusal".into())),
            Step::Hang => std::future::pending().await,
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Records what it was asked to say.
#[derive(Clone, Default)]
pub struct FakeSpeech {
    spoken: Arc<Mutex<Vec<String>>>,
}

impl FakeSpeech {
    pub fn spoken(&self) -> Vec<String> {
        self.spoken.lock().unwrap().clone()
    }
}

#[async_trait]
impl SpeechEngine for FakeSpeech {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        self.spoken.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[derive(Default)]
struct SinkInner {
    connected: bool,
    reconnect_results: VecDeque<bool>,
    reconnect_calls: u32,
}

/// A sink whose link state the test controls. Reconnects follow a script;
/// a spent script fails.
#[derive(Clone, Default)]
pub struct FakeSink {
    inner: Arc<Mutex<SinkInner>>,
}

impl FakeSink {
    pub fn connected() -> Self {
        let sink = Self::default();
        sink.set_connected(true);
        sink
    }

    pub fn disconnected(reconnect_results: Vec<bool>) -> Self {
        let sink = Self::default();
        sink.inner.lock().unwrap().reconnect_results = reconnect_results.into();
        sink
    }

    pub fn set_connected(&self, connected: bool) {
        self.inner.lock().unwrap().connected = connected;
    }

    pub fn reconnect_calls(&self) -> u32 {
        self.inner.lock().unwrap().reconnect_calls
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn connection_state(&self) -> SinkState {
        if self.inner.lock().unwrap().connected {
            SinkState::Connected
        } else {
            SinkState::Disconnected
        }
    }

    async fn reconnect(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        inner.reconnect_calls += 1;
        let ok = inner.reconnect_results.pop_front().unwrap_or(false);
        if ok {
            inner.connected = true;
        }
        ok
    }

    fn name(&self) -> &str {
        "fake"
    }
}
