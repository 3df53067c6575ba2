use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use currency_assist_common::frame::{Frame, Resolution};
use tokio::process::Command;
use tracing::{debug, info};

use crate::source::FrameSource;
use crate::CaptureError;

/// Upper bound on one still-capture process, on top of the exposure time.
const PROCESS_GRACE: Duration = Duration::from_secs(16);

/// The Raspberry Pi still-capture programs, newest first. They take the same
/// options under different spellings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StillProgram {
    RpicamStill,
    LibcameraStill,
    Raspistill,
}

impl StillProgram {
    pub const ALL: [StillProgram; 3] = [
        StillProgram::RpicamStill,
        StillProgram::LibcameraStill,
        StillProgram::Raspistill,
    ];

    pub fn binary(self) -> &'static str {
        match self {
            StillProgram::RpicamStill => "rpicam-still",
            StillProgram::LibcameraStill => "libcamera-still",
            StillProgram::Raspistill => "raspistill",
        }
    }

    pub fn args(self, output: &Path, resolution: Resolution, timeout_ms: u64) -> Vec<String> {
        let out = output.display().to_string();
        let t = timeout_ms.to_string();
        let w = resolution.width.to_string();
        let h = resolution.height.to_string();
        match self {
            StillProgram::RpicamStill => vec![
                "-o".into(),
                out,
                "-t".into(),
                t,
                "--width".into(),
                w,
                "--height".into(),
                h,
                "-n".into(),
            ],
            StillProgram::LibcameraStill => vec![
                "-o".into(),
                out,
                "--timeout".into(),
                t,
                "--width".into(),
                w,
                "--height".into(),
                h,
                "--nopreview".into(),
            ],
            StillProgram::Raspistill => {
                vec!["-o".into(), out, "-t".into(), t, "-w".into(), w, "-h".into(), h]
            }
        }
    }

    /// Find the first installed program on PATH.
    pub fn detect() -> Option<(StillProgram, PathBuf)> {
        Self::ALL
            .into_iter()
            .find_map(|prog| which::which(prog.binary()).ok().map(|path| (prog, path)))
    }
}

/// One-shot still capture through the Pi camera stack.
///
/// Each call runs the capture program once, writing to a scratch JPEG which is
/// read back and removed.
pub struct StillCamera {
    program: StillProgram,
    binary: PathBuf,
    output_path: PathBuf,
    resolution: Resolution,
    timeout_ms: u64,
    seq: u64,
}

impl StillCamera {
    pub fn new(resolution: Resolution, timeout_ms: u64) -> Result<Self, CaptureError> {
        let (program, binary) = StillProgram::detect().ok_or(CaptureError::NoCamera)?;
        info!(camera = program.binary(), path = %binary.display(), "using still camera");
        Ok(Self::with_program(program, binary, resolution, timeout_ms))
    }

    pub fn with_program(
        program: StillProgram,
        binary: PathBuf,
        resolution: Resolution,
        timeout_ms: u64,
    ) -> Self {
        let output_path =
            std::env::temp_dir().join(format!("currency_assist_{}.jpg", std::process::id()));
        Self {
            program,
            binary,
            output_path,
            resolution,
            timeout_ms,
            seq: 0,
        }
    }
}

#[async_trait]
impl FrameSource for StillCamera {
    async fn next_frame(&mut self) -> Result<Option<Frame>, CaptureError> {
        let _ = tokio::fs::remove_file(&self.output_path).await;

        let mut cmd = Command::new(&self.binary);
        cmd.args(self.program.args(&self.output_path, self.resolution, self.timeout_ms))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| CaptureError::Spawn(self.program.binary().to_string(), e))?;

        let limit = Duration::from_millis(self.timeout_ms) + PROCESS_GRACE;
        let output = tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| CaptureError::Timeout(limit))?
            .map_err(|e| CaptureError::Spawn(self.program.binary().to_string(), e))?;

        if !output.status.success() {
            return Err(CaptureError::CameraFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let jpeg = match tokio::fs::read(&self.output_path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CaptureError::OutputMissing(
                    self.output_path.display().to_string(),
                ));
            }
            Err(e) => return Err(CaptureError::ReadOutput(e)),
        };
        let _ = tokio::fs::remove_file(&self.output_path).await;

        let seq = self.seq;
        self.seq += 1;
        let frame = Frame::new(jpeg, Utc::now().timestamp_millis(), seq, self.resolution)?;
        debug!(seq, bytes = frame.payload_size(), "captured still frame");
        Ok(Some(frame))
    }

    fn name(&self) -> &str {
        self.program.binary()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_dialects() {
        let out = Path::new("/tmp/cap.jpg");
        let res = Resolution::new(1280, 720);

        let rpicam = StillProgram::RpicamStill.args(out, res, 1400);
        assert_eq!(
            rpicam,
            ["-o", "/tmp/cap.jpg", "-t", "1400", "--width", "1280", "--height", "720", "-n"]
        );

        let libcamera = StillProgram::LibcameraStill.args(out, res, 1400);
        assert!(libcamera.contains(&"--nopreview".to_string()));
        assert!(libcamera.contains(&"--timeout".to_string()));

        let raspistill = StillProgram::Raspistill.args(out, res, 1400);
        assert_eq!(raspistill, ["-o", "/tmp/cap.jpg", "-t", "1400", "-w", "1280", "-h", "720"]);
    }

    #[test]
    fn detection_order_prefers_rpicam() {
        assert_eq!(StillProgram::ALL[0], StillProgram::RpicamStill);
        assert_eq!(StillProgram::ALL[2], StillProgram::Raspistill);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_program_reports_status() {
        let mut camera = StillCamera::with_program(
            StillProgram::Raspistill,
            PathBuf::from("false"),
            Resolution::new(640, 480),
            10,
        );
        let err = camera.next_frame().await.unwrap_err();
        assert!(matches!(err, CaptureError::CameraFailed { status: 1, .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_output_is_reported() {
        // `true` exits cleanly without writing the image.
        let mut camera = StillCamera::with_program(
            StillProgram::Raspistill,
            PathBuf::from("true"),
            Resolution::new(640, 480),
            10,
        );
        let err = camera.next_frame().await.unwrap_err();
        assert!(matches!(err, CaptureError::OutputMissing(_)));
    }
}
