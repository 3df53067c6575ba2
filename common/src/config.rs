use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub recognition: RecognitionConfig,
    pub cache: CacheConfig,
    pub announcer: AnnouncerConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// `"still"` (rpicam-still and friends) or `"mjpeg"` (HTTP stream).
    #[serde(default = "default_camera_mode")]
    pub mode: String,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
    /// Exposure/settle time handed to the still-capture program.
    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,
    /// Only used in `mjpeg` mode.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_stall_timeout_secs")]
    pub stall_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    /// `"ahash"` or `"histogram"`.
    #[serde(default = "default_gate_method")]
    pub method: String,
    #[serde(default = "default_hash_size")]
    pub hash_size: u32,
    /// Minimum fingerprint delta for a frame to count as novel. Hamming bits
    /// for `ahash`, chi-squared distance for `histogram`.
    #[serde(default = "default_novelty_threshold")]
    pub novelty_threshold: f64,
    #[serde(default = "default_max_idle_secs")]
    pub max_idle_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecognitionConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_call_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,
    #[serde(default = "default_breaker_open_secs")]
    pub breaker_open_secs: u64,
}

/// No defaults here: the dedupe window is a product decision.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    pub dedupe_window_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnnouncerConfig {
    /// Required, for the same reason as the dedupe window.
    pub failure_notice_interval_secs: f64,
    #[serde(default = "default_speech_program")]
    pub speech_program: String,
    #[serde(default = "default_speech_rate")]
    pub speech_rate: u32,
    #[serde(default)]
    pub voice: Option<String>,
    /// Bluetooth address passed to `bluetoothctl connect` on reconnect.
    #[serde(default)]
    pub bt_device: Option<String>,
    #[serde(default = "default_card_prefix")]
    pub card_prefix: String,
    #[serde(default = "default_card_profile")]
    pub card_profile: String,
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    #[serde(default = "default_greeting")]
    pub greeting: String,
    #[serde(default = "default_farewell")]
    pub farewell: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Directory for admitted frames. Archiving is off when unset.
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default = "default_archive_max_files")]
    pub max_files: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            mode: default_camera_mode(),
            width: default_width(),
            height: default_height(),
            frame_interval_ms: default_frame_interval_ms(),
            capture_timeout_ms: default_capture_timeout_ms(),
            url: None,
            stall_timeout_secs: default_stall_timeout_secs(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            method: default_gate_method(),
            hash_size: default_hash_size(),
            novelty_threshold: default_novelty_threshold(),
            max_idle_secs: default_max_idle_secs(),
        }
    }
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            timeout_ms: default_call_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_open_secs: default_breaker_open_secs(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            dir: None,
            max_files: default_archive_max_files(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl CameraConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }

    pub fn stall_timeout(&self) -> Duration {
        Duration::from_secs(self.stall_timeout_secs)
    }
}

impl GateConfig {
    pub fn max_idle(&self) -> Duration {
        Duration::from_secs(self.max_idle_secs)
    }
}

impl RecognitionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    pub fn breaker_open(&self) -> Duration {
        Duration::from_secs(self.breaker_open_secs)
    }
}

impl CacheConfig {
    pub fn dedupe_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.dedupe_window_secs).unwrap_or(Duration::ZERO)
    }
}

impl AnnouncerConfig {
    pub fn failure_notice_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.failure_notice_interval_secs).unwrap_or(Duration::ZERO)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would wedge the pipeline rather than degrade it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if !matches!(self.camera.mode.as_str(), "still" | "mjpeg") {
            return invalid("camera.mode must be \"still\" or \"mjpeg\"");
        }
        if self.camera.mode == "mjpeg" && self.camera.url.is_none() {
            return invalid("camera.url is required in mjpeg mode");
        }
        if self.camera.frame_interval_ms == 0 {
            return invalid("camera.frame_interval_ms must be positive");
        }
        if self.camera.stall_timeout_secs == 0 {
            return invalid("camera.stall_timeout_secs must be positive");
        }
        if !matches!(self.gate.method.as_str(), "ahash" | "histogram") {
            return invalid("gate.method must be \"ahash\" or \"histogram\"");
        }
        if self.gate.hash_size == 0 {
            return invalid("gate.hash_size must be positive");
        }
        if self.gate.novelty_threshold < 0.0 {
            return invalid("gate.novelty_threshold must not be negative");
        }
        if self.recognition.max_attempts == 0 {
            return invalid("recognition.max_attempts must be at least 1");
        }
        if self.recognition.timeout_ms == 0 {
            return invalid("recognition.timeout_ms must be positive");
        }
        if self.recognition.breaker_failure_threshold == 0 {
            return invalid("recognition.breaker_failure_threshold must be at least 1");
        }
        if Duration::try_from_secs_f64(self.cache.dedupe_window_secs).is_err() {
            return invalid("cache.dedupe_window_secs must be a non-negative number of seconds");
        }
        if Duration::try_from_secs_f64(self.announcer.failure_notice_interval_secs).is_err() {
            return invalid(
                "announcer.failure_notice_interval_secs must be a non-negative number of seconds",
            );
        }
        if self.archive.dir.is_some() && self.archive.max_files == 0 {
            return invalid("archive.max_files must be at least 1 when archive.dir is set");
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_camera_mode() -> String {
    "still".into()
}
fn default_width() -> u32 {
    1280
}
fn default_height() -> u32 {
    720
}
fn default_frame_interval_ms() -> u64 {
    5000
}
fn default_capture_timeout_ms() -> u64 {
    1400
}
fn default_stall_timeout_secs() -> u64 {
    30
}
fn default_gate_method() -> String {
    "ahash".into()
}
fn default_hash_size() -> u32 {
    16
}
fn default_novelty_threshold() -> f64 {
    26.0
}
fn default_max_idle_secs() -> u64 {
    20
}
fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_model() -> String {
    "gemini-1.5-flash".into()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_call_timeout_ms() -> u64 {
    10_000
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    500
}
fn default_backoff_cap_ms() -> u64 {
    4000
}
fn default_breaker_failure_threshold() -> u32 {
    3
}
fn default_breaker_open_secs() -> u64 {
    60
}
fn default_speech_program() -> String {
    "espeak-ng".into()
}
fn default_speech_rate() -> u32 {
    130
}
fn default_card_prefix() -> String {
    "bluez_card".into()
}
fn default_card_profile() -> String {
    "a2dp-sink".into()
}
fn default_reconnect_attempts() -> u32 {
    3
}
fn default_reconnect_backoff_ms() -> u64 {
    1000
}
fn default_greeting() -> String {
    "System ready. Starting live capture.".into()
}
fn default_farewell() -> String {
    "Stopping capture. Goodbye.".into()
}
fn default_archive_max_files() -> usize {
    200
}
fn default_log_level() -> String {
    "info".into()
}
