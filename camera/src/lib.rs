//! Frame acquisition: camera adapters, the latest-frame slot, and the capture
//! loop that connects them.

pub mod capture;
pub mod mjpeg;
pub mod slot;
pub mod source;
pub mod still;

pub use capture::run_capture_loop;
pub use slot::{latest_frame, FrameSlot, LatestFrame, NextFrame};
pub use source::FrameSource;

use currency_assist_common::frame::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("no still-capture program found (tried rpicam-still, libcamera-still, raspistill)")]
    NoCamera,
    #[error("failed to spawn {0}: {1}")]
    Spawn(String, std::io::Error),
    #[error("camera exited with status {status}: {stderr}")]
    CameraFailed { status: i32, stderr: String },
    #[error("camera did not finish within {0:?}")]
    Timeout(std::time::Duration),
    #[error("capture output missing at {0}")]
    OutputMissing(String),
    #[error("failed to read capture output: {0}")]
    ReadOutput(std::io::Error),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("MJPEG stream ended")]
    StreamEnded,
    #[error(transparent)]
    Frame(#[from] FrameError),
}
