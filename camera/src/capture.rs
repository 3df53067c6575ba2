use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::slot::FrameSlot;
use crate::source::FrameSource;

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Pull frames from `source` into `slot` until the reader goes away.
///
/// With `pacing` set, one frame is requested per tick and late ticks are
/// skipped rather than bursted. Without it the source sets the pace (MJPEG
/// streams push at their own rate). Capture errors back off exponentially.
pub async fn run_capture_loop<S>(source: &mut S, slot: &FrameSlot, pacing: Option<Duration>)
where
    S: FrameSource + ?Sized,
{
    let mut ticker = pacing.map(|interval| {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker
    });
    let mut backoff = INITIAL_BACKOFF;
    let mut published: u64 = 0;

    info!(source = source.name(), ?pacing, "capture loop started");

    loop {
        if slot.is_closed() {
            break;
        }
        if let Some(ticker) = ticker.as_mut() {
            ticker.tick().await;
        }

        match source.next_frame().await {
            Ok(Some(frame)) => {
                backoff = INITIAL_BACKOFF;
                let seq = frame.seq;
                if !slot.publish(frame) {
                    break;
                }
                published += 1;
                if published % 100 == 0 {
                    debug!(published, "frames captured");
                }
                debug!(seq, "published frame");
            }
            Ok(None) => {
                debug!(source = source.name(), "no frame available");
            }
            Err(e) => {
                warn!(error = %e, source = source.name(), "capture failed, retrying in {:?}", backoff);
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }

    info!(published, "capture loop stopped, no readers left");
}
