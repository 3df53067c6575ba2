use std::sync::Arc;
use std::time::Duration;

use currency_assist_common::frame::Frame;
use tokio::sync::watch;

/// Create a single-slot latest-frame buffer.
///
/// The writer overwrites the slot on every publish; the reader only ever sees
/// the newest frame, and frames it was too busy to look at are gone.
pub fn latest_frame() -> (FrameSlot, LatestFrame) {
    let (tx, rx) = watch::channel(None);
    (FrameSlot { tx }, LatestFrame { rx })
}

/// Capture-side handle of the slot.
pub struct FrameSlot {
    tx: watch::Sender<Option<Arc<Frame>>>,
}

impl FrameSlot {
    /// Replace whatever is in the slot. Returns `false` once the reader is gone.
    pub fn publish(&self, frame: Frame) -> bool {
        self.tx.send(Some(Arc::new(frame))).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What the reader got when asking for a frame with a deadline.
#[derive(Debug)]
pub enum NextFrame {
    Frame(Arc<Frame>),
    /// Nothing new arrived before the deadline.
    Stalled,
    /// The capture side shut down.
    Closed,
}

/// Pipeline-side handle of the slot.
pub struct LatestFrame {
    rx: watch::Receiver<Option<Arc<Frame>>>,
}

impl LatestFrame {
    /// Wait for a frame newer than the last one returned.
    pub async fn next(&mut self) -> Option<Arc<Frame>> {
        loop {
            self.rx.changed().await.ok()?;
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }

    /// Like [`next`](Self::next), but gives up after `timeout`.
    pub async fn next_within(&mut self, timeout: Duration) -> NextFrame {
        match tokio::time::timeout(timeout, self.next()).await {
            Ok(Some(frame)) => NextFrame::Frame(frame),
            Ok(None) => NextFrame::Closed,
            Err(_) => NextFrame::Stalled,
        }
    }
}
