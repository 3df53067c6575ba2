use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use currency_assist_common::frame::{Frame, Resolution};
use futures_util::stream::BoxStream;
use futures_util::StreamExt;
use std::time::Duration;
use tracing::{debug, info};

use crate::source::FrameSource;
use crate::CaptureError;

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for a `multipart/x-mixed-replace` MJPEG body.
///
/// Feed it raw chunks with [`push`](Self::push) and drain complete JPEGs with
/// [`next_jpeg`](Self::next_jpeg). Parts and boundaries may span chunks.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    jpeg_start: usize,
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MjpegParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.state = ParseState::SeekingBoundary;
        self.jpeg_start = 0;
    }

    /// Returns the next complete JPEG part, or `None` if more bytes are needed.
    pub fn next_jpeg(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep last few bytes in case boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        return None;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    let pos = find_subsequence(&self.buffer, HEADER_END)?;
                    let _ = self.buffer.split_to(pos + HEADER_END.len());
                    self.jpeg_start = 0;
                    self.state = ParseState::CollectingJpeg;
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        // Skip already-scanned bytes next time
                        self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        return None;
                    };

                    let jpeg_end = self.jpeg_start + pos;
                    // Strip trailing \r\n before boundary
                    let end = if jpeg_end >= 2
                        && self.buffer[jpeg_end - 2] == b'\r'
                        && self.buffer[jpeg_end - 1] == b'\n'
                    {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };

                    let jpeg = self.buffer[..end].to_vec();
                    let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                    self.state = ParseState::SeekingHeaderEnd;

                    if !jpeg.is_empty() {
                        return Some(jpeg);
                    }
                }
            }
        }
    }
}

/// Frames from a network camera serving MJPEG over HTTP.
///
/// The connection is opened lazily and dropped on any stream error, so the
/// next call after a failure reconnects.
pub struct MjpegSource {
    url: String,
    client: reqwest::Client,
    stream: Option<BoxStream<'static, reqwest::Result<Bytes>>>,
    parser: MjpegParser,
    resolution: Resolution,
    seq: u64,
}

impl MjpegSource {
    pub fn new(url: &str, resolution: Resolution) -> Result<Self, CaptureError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(CaptureError::HttpConnect)?;
        Ok(Self {
            url: url.to_string(),
            client,
            stream: None,
            parser: MjpegParser::new(),
            resolution,
            seq: 0,
        })
    }

    // Not `&self`: the boxed stream is not `Sync`, and `next_frame` must stay `Send`.
    async fn connect(
        client: &reqwest::Client,
        url: &str,
    ) -> Result<BoxStream<'static, reqwest::Result<Bytes>>, CaptureError> {
        info!(url, "connecting to MJPEG stream");
        let response = client
            .get(url)
            .send()
            .await
            .map_err(CaptureError::HttpConnect)?;

        if !response.status().is_success() {
            return Err(CaptureError::HttpStatus(response.status().as_u16()));
        }

        info!(status = %response.status(), "connected to MJPEG stream");
        Ok(response.bytes_stream().boxed())
    }

    fn disconnect(&mut self) {
        self.stream = None;
        self.parser.reset();
    }
}

#[async_trait]
impl FrameSource for MjpegSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        loop {
            if let Some(jpeg) = self.parser.next_jpeg() {
                let seq = self.seq;
                self.seq += 1;
                let frame = Frame::new(jpeg, Utc::now().timestamp_millis(), seq, self.resolution)?;
                debug!(seq, bytes = frame.payload_size(), "parsed MJPEG frame");
                return Ok(Some(frame));
            }

            if self.stream.is_none() {
                let stream = Self::connect(&self.client, &self.url).await?;
                self.stream = Some(stream);
            }
            let Some(stream) = self.stream.as_mut() else {
                return Ok(None);
            };

            match stream.next().await {
                Some(Ok(chunk)) => self.parser.push(&chunk),
                Some(Err(e)) => {
                    self.disconnect();
                    return Err(CaptureError::HttpStream(e));
                }
                None => {
                    self.disconnect();
                    return Err(CaptureError::StreamEnded);
                }
            }
        }
    }

    fn name(&self) -> &str {
        "mjpeg"
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
