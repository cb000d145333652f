//! Engine configuration
//!
//! A single JSON document holding everything the engine needs at runtime:
//! serial line speed, timing of the AT exchanges, where recordings are
//! written and which device identity is stamped onto persisted call records.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{ModemError, ModemResult};

/// Identity of the machine the modems are attached to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceIdentity {
    pub id: String,
    pub name: String,
    pub location: String,
}

impl Default for DeviceIdentity {
    fn default() -> Self {
        Self {
            id: "default-device".to_string(),
            name: "GSM-Node-01".to_string(),
            location: "Unknown".to_string(),
        }
    }
}

/// What to do with the bytes of the chunk that carries the end-of-download token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalChunkPolicy {
    /// Discard the whole terminating chunk
    #[default]
    Drop,
    /// Keep the bytes that precede the token in the terminating chunk
    KeepPrefix,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Serial baud rate (frame is always 8N1, no parity)
    pub baud_rate: u32,
    /// Directory recordings are written to
    pub recording_dir: PathBuf,
    /// JSON-lines file call records are appended to
    pub records_path: PathBuf,
    /// Extension of saved recordings, without the dot
    pub audio_extension: String,
    /// Period of the `AT+CLCC` status poll
    pub poll_interval_ms: u64,
    /// Timeout of one `AT+CLCC` exchange
    pub status_timeout_ms: u64,
    /// Timeout of the on-modem file listing
    pub file_list_timeout_ms: u64,
    /// Delay after `AT+CMGF=1`
    pub sms_mode_settle_ms: u64,
    /// Delay after `AT+CMGS="<num>"`
    pub sms_recipient_settle_ms: u64,
    /// How long an empty call list is tolerated before the modem reported the call
    pub no_call_grace_ms: u64,
    /// Delay between opening a port and the first probe query
    pub probe_settle_ms: u64,
    /// Download watchdog in seconds, 0 disables it
    pub download_timeout_secs: u64,
    /// Worker threads for polling, timers and completion work
    pub worker_threads: usize,
    pub final_chunk: FinalChunkPolicy,
    pub device: DeviceIdentity,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            recording_dir: PathBuf::from("recordings"),
            records_path: PathBuf::from("calls.jsonl"),
            audio_extension: "wav".to_string(),
            poll_interval_ms: 500,
            status_timeout_ms: 1_000,
            file_list_timeout_ms: 2_000,
            sms_mode_settle_ms: 300,
            sms_recipient_settle_ms: 500,
            no_call_grace_ms: 5_000,
            probe_settle_ms: 500,
            download_timeout_secs: 60,
            worker_threads: 10,
            final_chunk: FinalChunkPolicy::Drop,
            device: DeviceIdentity::default(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration file. A missing file yields the defaults.
    pub fn load(path: &Path) -> ModemResult<Self> {
        if !path.exists() {
            log::info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .map_err(|e| ModemError::Config(format!("Failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&json)
            .map_err(|e| ModemError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> ModemResult<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ModemError::Config(format!("Serialization error: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| ModemError::Config(format!("Failed to write {}: {e}", path.display())))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn file_list_timeout(&self) -> Duration {
        Duration::from_millis(self.file_list_timeout_ms)
    }

    pub fn no_call_grace(&self) -> Duration {
        Duration::from_millis(self.no_call_grace_ms)
    }

    pub fn probe_settle(&self) -> Duration {
        Duration::from_millis(self.probe_settle_ms)
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        (self.download_timeout_secs > 0).then(|| Duration::from_secs(self.download_timeout_secs))
    }
}

/// Validate a recording file name before it is joined onto the recording directory.
///
/// Rejects anything with path separators, "..", or empty strings.
pub fn sanitize_file_name(name: &str) -> ModemResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ModemError::Recording("File name cannot be empty".to_string()));
    }
    if trimmed.contains("..") || trimmed.contains('/') || trimmed.contains('\\') {
        return Err(ModemError::Recording(format!("Invalid file name '{trimmed}'")));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(ModemError::Recording(format!(
            "File name '{trimmed}' contains invalid characters"
        )));
    }
    Ok(trimmed.to_string())
}
