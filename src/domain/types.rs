//! Core domain types

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one call on a port.
///
/// `Ended` is terminal. Outbound sessions start in `Dialing`, sessions
/// created from an unsolicited ring start in `Incoming`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CallState {
    Dialing,
    Ringing,
    Incoming,
    /// Remote party picked up (connected)
    Active,
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Dialing => "DIALING",
            CallState::Ringing => "RINGING",
            CallState::Incoming => "INCOMING",
            CallState::Active => "ACTIVE",
            CallState::Ended => "ENDED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended)
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recording sub-state, independent of the call state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordingState {
    Idle,
    Recording,
    Downloading,
    Completed,
    Failed,
}

impl RecordingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordingState::Idle => "IDLE",
            RecordingState::Recording => "RECORDING",
            RecordingState::Downloading => "DOWNLOADING",
            RecordingState::Completed => "COMPLETED",
            RecordingState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session reached `Ended`. Stored verbatim as the record's `callState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndReason {
    /// The network or the remote party ended the call
    Completed,
    AutoHangup,
    ManualHangup,
    Cleanup,
    /// A new call was placed on the same port
    Replaced,
    /// The OS did not accept the dial command
    DialFailed,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Completed => "COMPLETED",
            EndReason::AutoHangup => "AUTO_HANGUP",
            EndReason::ManualHangup => "MANUAL_HANGUP",
            EndReason::Cleanup => "CLEANUP",
            EndReason::Replaced => "REPLACED",
            EndReason::DialFailed => "DIAL_FAILED",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Outbound,
    Inbound,
}

/// Point-in-time view of a call session, returned by `status()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub com_port: String,
    pub direction: CallDirection,
    pub target_number: Option<String>,
    pub caller_number: Option<String>,
    pub order_id: String,
    pub call_state: CallState,
    pub recording_state: RecordingState,
    pub start_time: DateTime<Utc>,
    pub connect_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: u32,
    pub max_duration_seconds: u32,
    pub recording_file_name: Option<String>,
}

/// Payload handed to the status broadcaster on every transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub com_port: String,
    pub call_state: CallState,
    pub recording_state: RecordingState,
    pub target_number: Option<String>,
    pub duration_seconds: u32,
    pub start_time: Option<DateTime<Utc>>,
    pub connect_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub recording_file_name: Option<String>,
}

/// Durable summary of one completed call. Written exactly once per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRecord {
    pub id: String,
    pub order_id: String,
    pub device_id: String,
    pub device_name: String,
    pub device_location: String,
    pub com_port: String,
    pub sim_phone: Option<String>,
    pub from_number: Option<String>,
    pub target_number: Option<String>,
    /// End reason, e.g. "COMPLETED" or "AUTO_HANGUP"
    pub call_state: String,
    pub start_time: DateTime<Utc>,
    pub connect_time: Option<DateTime<Utc>>,
    pub end_time: DateTime<Utc>,
    pub duration_seconds: u32,
    pub recording_file_name: Option<String>,
    pub recording_file_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Information about a serial port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialPortInfo {
    pub name: String,
    pub port_type: String,
}

/// Received signal strength as reported by `AT+CSQ`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalStrength {
    pub rssi: u8,
    pub quality: String,
}

impl SignalStrength {
    pub fn from_rssi(rssi: u8) -> Self {
        let quality = match rssi {
            20.. => "Excellent",
            15..=19 => "Good",
            10..=14 => "Fair",
            5..=9 => "Poor",
            _ => "No Signal",
        };
        Self {
            rssi,
            quality: quality.to_string(),
        }
    }
}

/// Result of probing one port for a modem and its SIM
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimInfo {
    pub com_port: String,
    pub available: bool,
    pub status: String,
    pub phone_number: Option<String>,
    pub carrier: Option<String>,
    pub imei: Option<String>,
    pub signal: Option<SignalStrength>,
}

impl SimInfo {
    pub fn unavailable(port: &str, status: impl Into<String>) -> Self {
        Self {
            com_port: port.to_string(),
            available: false,
            status: status.into(),
            phone_number: None,
            carrier: None,
            imei: None,
            signal: None,
        }
    }
}
