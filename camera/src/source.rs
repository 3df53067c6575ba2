use async_trait::async_trait;
use currency_assist_common::frame::Frame;

use crate::CaptureError;

/// Pull-based camera adapter.
///
/// `Ok(None)` means no frame was available this time; the caller simply asks
/// again later. Errors are never fatal to the capture loop.
#[async_trait]
pub trait FrameSource: Send {
    async fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
