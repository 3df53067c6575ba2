use std::fmt;

/// Pixel dimensions a frame was captured at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// A JPEG camera frame with capture metadata.
///
/// Frames are produced by the capture task and handed to the pipeline through
/// the latest-frame slot; the pipeline keeps one for a single iteration at most.
#[derive(Debug, Clone)]
pub struct Frame {
    pub seq: u64,
    pub captured_at_ms: i64,
    pub jpeg: Vec<u8>,
    pub resolution: Resolution,
}

impl Frame {
    pub fn new(
        jpeg: Vec<u8>,
        captured_at_ms: i64,
        seq: u64,
        resolution: Resolution,
    ) -> Result<Self, FrameError> {
        if jpeg.is_empty() {
            return Err(FrameError::Empty { seq });
        }
        if !jpeg.starts_with(&JPEG_SOI) {
            return Err(FrameError::NotJpeg { seq });
        }
        Ok(Self {
            seq,
            captured_at_ms,
            jpeg,
            resolution,
        })
    }

    pub fn payload_size(&self) -> usize {
        self.jpeg.len()
    }

    /// Relative path for archiving this frame, grouped by capture date.
    pub fn object_key(&self, prefix: &str) -> String {
        let dt = chrono::DateTime::from_timestamp_millis(self.captured_at_ms)
            .unwrap_or_else(chrono::Utc::now);
        let date = dt.format("%Y-%m-%d");
        let ts = dt.format("%Y%m%dT%H%M%S%3fZ");
        format!("{prefix}{date}/{ts}_{seq:06}.jpg", seq = self.seq)
    }
}

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame {seq} has an empty payload")]
    Empty { seq: u64 },
    #[error("frame {seq} payload is not a JPEG image")]
    NotJpeg { seq: u64 },
}
