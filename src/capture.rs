//! Audio capture pipeline
//!
//! Reassembles an audio file the modem streams back in-band, interleaved
//! with AT text on the same serial line. There is no length framing: the
//! container signature starts a capture, the download reply token ends it,
//! and every raw byte in between is kept verbatim.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::Local;

use crate::at::{find_bytes, AUDIO_SIGNATURE, DOWNLOAD_END_TOKEN};
use crate::domain::{sanitize_file_name, FinalChunkPolicy, ModemError, ModemResult};
use crate::sync::lock;

/// A recording written to disk
#[derive(Debug, Clone, PartialEq)]
pub struct SavedRecording {
    pub port: String,
    pub file_name: String,
    pub path: PathBuf,
    pub bytes: usize,
}

/// Something the registry should broadcast
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureEvent {
    /// Signature seen with no capture armed
    Started { file_name: String },
    Saved(SavedRecording),
    Failed { file_name: String, reason: String },
}

struct Accumulator {
    file_name: String,
    buffer: Vec<u8>,
}

/// Per-port capture buffers, keyed by port identifier
pub struct AudioCapture {
    save_dir: PathBuf,
    extension: String,
    policy: FinalChunkPolicy,
    active: Mutex<HashMap<String, Accumulator>>,
}

impl AudioCapture {
    pub fn new(save_dir: impl Into<PathBuf>, extension: &str, policy: FinalChunkPolicy) -> Self {
        Self {
            save_dir: save_dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
            policy,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Arm capture for `port`, discarding anything buffered so far.
    pub fn start(&self, port: &str, file_name: &str) {
        log::info!("[{port}] capture armed for {file_name}");
        lock(&self.active).insert(
            port.to_string(),
            Accumulator {
                file_name: file_name.to_string(),
                buffer: Vec::new(),
            },
        );
    }

    pub fn is_capturing(&self, port: &str) -> bool {
        lock(&self.active).contains_key(port)
    }

    /// Feed one inbound chunk.
    ///
    /// `text` is the ASCII view of `raw` and is only used to find tokens;
    /// `raw` is what lands in the file.
    pub fn feed(&self, port: &str, raw: &[u8], text: &str) -> Option<CaptureEvent> {
        let mut started = None;
        let finished = {
            let mut active = lock(&self.active);

            if !active.contains_key(port) {
                if !text.contains(AUDIO_SIGNATURE) {
                    return None;
                }
                let file_name = generate_timestamped_name();
                log::info!("[{port}] audio signature seen, capturing into {file_name}");
                active.insert(
                    port.to_string(),
                    Accumulator {
                        file_name: file_name.clone(),
                        buffer: Vec::new(),
                    },
                );
                started = Some(CaptureEvent::Started { file_name });
            }

            let acc = active.get_mut(port)?;
            if !text.contains(DOWNLOAD_END_TOKEN) {
                acc.buffer.extend_from_slice(raw);
                None
            } else {
                if self.policy == FinalChunkPolicy::KeepPrefix {
                    let end = find_bytes(raw, DOWNLOAD_END_TOKEN.as_bytes()).unwrap_or(0);
                    acc.buffer.extend_from_slice(&raw[..end]);
                }
                active.remove(port)
            }
        };

        // File I/O happens outside the lock
        match finished {
            Some(acc) => Some(self.persist(port, acc)),
            None => started,
        }
    }

    /// Stop capturing on `port` and write whatever has been buffered.
    pub fn finalize(&self, port: &str) -> Option<CaptureEvent> {
        let acc = lock(&self.active).remove(port)?;
        Some(self.persist(port, acc))
    }

    /// Drop the buffer for `port` without writing anything.
    pub fn abort(&self, port: &str) -> bool {
        let removed = lock(&self.active).remove(port);
        if let Some(acc) = &removed {
            log::info!(
                "[{port}] capture of {} aborted ({} bytes discarded)",
                acc.file_name,
                acc.buffer.len()
            );
        }
        removed.is_some()
    }

    /// Drop the buffer for `port` only if it is collecting `file_name`.
    pub fn discard(&self, port: &str, file_name: &str) -> bool {
        let mut active = lock(&self.active);
        if active.get(port).map(|acc| acc.file_name.as_str()) != Some(file_name) {
            return false;
        }
        active.remove(port);
        log::info!("[{port}] capture of {file_name} discarded");
        true
    }

    /// Download watchdog: abort the capture if it is still the one named `file_name`.
    pub fn expire(&self, port: &str, file_name: &str) -> Option<CaptureEvent> {
        let mut active = lock(&self.active);
        if active.get(port).map(|acc| acc.file_name.as_str()) != Some(file_name) {
            return None;
        }
        let acc = active.remove(port)?;
        drop(active);
        log::warn!(
            "[{port}] download of {file_name} timed out after {} bytes",
            acc.buffer.len()
        );
        Some(CaptureEvent::Failed {
            file_name: acc.file_name,
            reason: "download timed out".to_string(),
        })
    }

    /// `<save_dir>/<file_name>.<ext>`
    pub fn recording_path(&self, file_name: &str) -> ModemResult<PathBuf> {
        let name = sanitize_file_name(file_name)?;
        Ok(self.save_dir.join(format!("{name}.{}", self.extension)))
    }

    fn persist(&self, port: &str, acc: Accumulator) -> CaptureEvent {
        match self.write_file(&acc) {
            Ok(path) => {
                log::info!(
                    "[{port}] saved recording {} ({} bytes)",
                    path.display(),
                    acc.buffer.len()
                );
                CaptureEvent::Saved(SavedRecording {
                    port: port.to_string(),
                    file_name: acc.file_name,
                    path,
                    bytes: acc.buffer.len(),
                })
            }
            Err(e) => {
                log::error!("[{port}] failed to save recording {}: {e}", acc.file_name);
                CaptureEvent::Failed {
                    file_name: acc.file_name,
                    reason: e.to_string(),
                }
            }
        }
    }

    fn write_file(&self, acc: &Accumulator) -> ModemResult<PathBuf> {
        let path = self.recording_path(&acc.file_name)?;
        std::fs::create_dir_all(&self.save_dir).map_err(|e| {
            ModemError::Recording(format!("Failed to create {}: {e}", self.save_dir.display()))
        })?;
        std::fs::write(&path, &acc.buffer)
            .map_err(|e| ModemError::Recording(format!("Failed to write {}: {e}", path.display())))?;
        Ok(path)
    }
}

/// Name for a recording started on request: `call_<epoch millis>`
pub fn generate_file_name() -> String {
    format!("call_{}", chrono::Utc::now().timestamp_millis())
}

/// Name for a capture started by the signature alone: `call_<yyyyMMdd_HHmmss>`
fn generate_timestamped_name() -> String {
    format!("call_{}", Local::now().format("%Y%m%d_%H%M%S"))
}
