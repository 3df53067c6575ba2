use std::fmt;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use currency_assist_common::config::AnnouncerConfig;
use tokio::process::Command;
use tracing::{debug, info, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);
/// Time for the sound server to create the sink after a profile switch.
const PROFILE_SETTLE: Duration = Duration::from_millis(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Disconnected,
    /// The device is known to the sound server but has no usable sink yet.
    Connecting,
    Connected,
}

impl fmt::Display for SinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SinkState::Disconnected => "disconnected",
            SinkState::Connecting => "connecting",
            SinkState::Connected => "connected",
        })
    }
}

/// Where speech ends up. Pull-based: the state is polled, never pushed.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn connection_state(&self) -> SinkState;

    /// One reconnection attempt. True if the sink is usable afterwards.
    async fn reconnect(&self) -> bool;

    fn name(&self) -> &str {
        "unnamed"
    }
}

/// A Bluetooth headset managed through `pactl` and `bluetoothctl`.
pub struct BluetoothSink {
    card_prefix: String,
    profile: String,
    device: Option<String>,
}

impl BluetoothSink {
    pub fn new(config: &AnnouncerConfig) -> Self {
        Self {
            card_prefix: config.card_prefix.clone(),
            profile: config.card_profile.clone(),
            device: config.bt_device.clone(),
        }
    }

    async fn card(&self) -> Option<String> {
        let cards = run_cmd("pactl", &["list", "short", "cards"]).await?;
        find_card(&cards, &self.card_prefix)
    }

    async fn sink_for(&self, card: &str) -> Option<String> {
        let sinks = run_cmd("pactl", &["list", "short", "sinks"]).await?;
        find_sink(&sinks, card)
    }
}

#[async_trait]
impl AudioSink for BluetoothSink {
    async fn connection_state(&self) -> SinkState {
        let Some(card) = self.card().await else {
            return SinkState::Disconnected;
        };
        match self.sink_for(&card).await {
            Some(_) => SinkState::Connected,
            None => SinkState::Connecting,
        }
    }

    async fn reconnect(&self) -> bool {
        if let Some(device) = &self.device {
            if run_cmd("bluetoothctl", &["connect", device]).await.is_none() {
                return false;
            }
        }

        let Some(card) = self.card().await else {
            debug!(prefix = self.card_prefix, "no bluetooth card present");
            return false;
        };

        if run_cmd("pactl", &["set-card-profile", &card, &self.profile])
            .await
            .is_none()
        {
            return false;
        }
        info!(card, profile = self.profile, "card profile set");
        tokio::time::sleep(PROFILE_SETTLE).await;

        let Some(sink) = self.sink_for(&card).await else {
            warn!(card, "profile set but no sink appeared");
            return false;
        };
        if run_cmd("pactl", &["set-default-sink", &sink]).await.is_none() {
            return false;
        }
        info!(sink, "default sink set");
        true
    }

    fn name(&self) -> &str {
        "bluetooth"
    }
}

/// Card name from `pactl list short cards` output: the second column of the
/// first line whose name starts with `prefix`.
pub fn find_card(output: &str, prefix: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .find(|name| name.starts_with(prefix))
        .map(str::to_string)
}

/// Sink belonging to `card` from `pactl list short sinks` output. Cards and
/// sinks share the device part of their names
/// (`bluez_card.AA_BB..` / `bluez_sink.AA_BB...a2dp_sink`).
pub fn find_sink(output: &str, card: &str) -> Option<String> {
    let device = card.split_once('.').map(|(_, d)| d).unwrap_or(card);
    if device.is_empty() {
        return None;
    }
    output
        .lines()
        .filter_map(|line| line.split_whitespace().nth(1))
        .find(|name| {
            name.split_once('.')
                .is_some_and(|(_, rest)| rest.starts_with(device))
        })
        .map(str::to_string)
}

/// Run a short-lived command and return its stdout, or `None` if it could not
/// run, failed or timed out.
async fn run_cmd(program: &str, args: &[&str]) -> Option<String> {
    let output = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output();

    match tokio::time::timeout(COMMAND_TIMEOUT, output).await {
        Ok(Ok(out)) if out.status.success() => {
            Some(String::from_utf8_lossy(&out.stdout).into_owned())
        }
        Ok(Ok(out)) => {
            debug!(
                program,
                ?args,
                status = out.status.code().unwrap_or(-1),
                stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                "command failed"
            );
            None
        }
        Ok(Err(e)) => {
            warn!(program, error = %e, "failed to run command");
            None
        }
        Err(_) => {
            warn!(program, ?args, "command timed out after {:?}", COMMAND_TIMEOUT);
            None
        }
    }
}
