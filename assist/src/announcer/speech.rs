use std::io;
use std::process::Stdio;

use async_trait::async_trait;
use currency_assist_common::config::AnnouncerConfig;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    #[error("failed to start speech program {0}: {1}")]
    Spawn(String, io::Error),
    #[error("speech program exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },
}

/// Text-to-speech. `speak` resolves once the utterance has finished playing.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    async fn speak(&self, text: &str) -> Result<(), SpeechError>;

    fn name(&self) -> &str {
        "unnamed"
    }
}

/// Speaks through an `espeak-ng`-compatible program. Dropping the `speak`
/// future kills the child, cutting the utterance off.
pub struct EspeakEngine {
    program: String,
    rate: u32,
    voice: Option<String>,
}

impl EspeakEngine {
    pub fn new(config: &AnnouncerConfig) -> Self {
        Self {
            program: config.speech_program.clone(),
            rate: config.speech_rate,
            voice: config.voice.clone(),
        }
    }

    fn args(&self, text: &str) -> Vec<String> {
        let mut args = vec!["-s".to_string(), self.rate.to_string()];
        if let Some(voice) = &self.voice {
            args.push("-v".to_string());
            args.push(voice.clone());
        }
        // Text starting with '-' must not be read as a flag.
        args.push("--".to_string());
        args.push(text.to_string());
        args
    }
}

#[async_trait]
impl SpeechEngine for EspeakEngine {
    async fn speak(&self, text: &str) -> Result<(), SpeechError> {
        debug!(program = self.program, rate = self.rate, text, "speaking");
        let output = Command::new(&self.program)
            .args(self.args(text))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SpeechError::Spawn(self.program.clone(), e))?;

        if !output.status.success() {
            return Err(SpeechError::Failed {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.program
    }
}
