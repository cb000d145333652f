//! PortRegistry: the call orchestrator.
//!
//! Maps each port identifier to its serial channel, its (at most one) call
//! session and its status poller, and exposes the public call / SMS /
//! recording operations. Ports never share a lock: the map lock is held
//! only to look entries up, every per-port mutation goes through that
//! port's own mutexes.
//!
//! Threading:
//! - inbound chunks arrive on the port's reader thread (`on_inbound`);
//!   nothing reachable from there blocks on the serial line
//! - polls, timers, disconnect handling and downloads run on the
//!   registry-owned `Scheduler`
//! - callbacks hold `Weak` references so a dropped registry never keeps
//!   ports alive

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use crate::at::{
    decode_call_list, encode, latest_recording_file, scan_notification, validate_number,
    AtCommand, CallList, Notification, CTRL_Z, ESC,
};
use crate::call::{CallSession, Transition};
use crate::capture::{generate_file_name, AudioCapture, CaptureEvent};
use crate::channel::SerialChannel;
use crate::domain::{
    CallState, EndReason, EngineConfig, ModemError, ModemResult, RecordingState, SessionSnapshot,
    StatusUpdate,
};
use crate::ports::{CallRecordRepository, SerialFactory, StatusBroadcaster};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::sync::{lock, read, write};

/// Everything the registry keeps for one port
struct PortEntry {
    port: String,
    channel: SerialChannel,
    session: Mutex<Option<CallSession>>,
    poller: Mutex<Option<TaskHandle>>,
    watchdog: Mutex<Option<TaskHandle>>,
    /// Last update broadcast for this port, reused for post-call recording events
    last_update: Mutex<Option<StatusUpdate>>,
    /// Serializes lifecycle operations (place / answer / hangup / cleanup / SMS)
    ops: Mutex<()>,
    /// Set while a file streams back from the modem
    downloading: AtomicBool,
    /// Bumped on every download start; ties a watchdog to its download
    downloads: AtomicU64,
}

struct Inner {
    config: EngineConfig,
    factory: Arc<dyn SerialFactory>,
    repository: Arc<dyn CallRecordRepository>,
    broadcaster: Arc<dyn StatusBroadcaster>,
    capture: AudioCapture,
    scheduler: Scheduler,
    ports: RwLock<HashMap<String, Arc<PortEntry>>>,
    sim_phones: RwLock<HashMap<String, String>>,
}

pub struct PortRegistry {
    inner: Arc<Inner>,
}

impl PortRegistry {
    pub fn new(
        config: EngineConfig,
        factory: Arc<dyn SerialFactory>,
        repository: Arc<dyn CallRecordRepository>,
        broadcaster: Arc<dyn StatusBroadcaster>,
    ) -> Self {
        let capture = AudioCapture::new(
            config.recording_dir.clone(),
            &config.audio_extension,
            config.final_chunk,
        );
        let scheduler = Scheduler::new(config.worker_threads);
        log::info!(
            "Port registry started ({} workers, recordings in {})",
            config.worker_threads,
            config.recording_dir.display()
        );
        Self {
            inner: Arc::new(Inner {
                config,
                factory,
                repository,
                broadcaster,
                capture,
                scheduler,
                ports: RwLock::new(HashMap::new()),
                sim_phones: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Open `port` without placing a call, so that incoming calls are seen.
    pub fn open(&self, port: &str) -> bool {
        self.inner.entry(port).channel.open()
    }

    /// Dial `target` on `port`.
    ///
    /// Any session already on the port is ended first (`REPLACED`).
    /// Returns the recording file name when `record` is set.
    pub fn place_call(
        &self,
        port: &str,
        target: &str,
        record: bool,
        max_duration_secs: u32,
    ) -> ModemResult<Option<String>> {
        let target = validate_number(target)?.to_string();
        let inner = &self.inner;
        let entry = inner.entry(port);
        let _ops = lock(&entry.ops);

        if !entry.channel.open() {
            return Err(ModemError::ChannelOpen(port.to_string()));
        }
        inner.complete(&entry, EndReason::Replaced, None);

        let mut session = CallSession::outbound(port, &target, max_duration_secs);
        let recording = record.then(generate_file_name);
        if let Some(name) = &recording {
            inner.arm_capture(&entry, name);
            session.start_recording(name);
        }
        let update = session.status_update();
        *lock(&entry.session) = Some(session);
        inner.publish(&entry, update);

        if !entry.channel.send(&encode(&AtCommand::Dial(target.clone()))) {
            inner.complete(&entry, EndReason::DialFailed, None);
            return Err(ModemError::Serial(format!(
                "Dial command to {target} not accepted on {port}"
            )));
        }
        log::info!(
            "[{port}] dialing {target} (record: {record}, max duration: {max_duration_secs}s)"
        );
        inner.start_polling(&entry);
        Ok(recording)
    }

    /// Accept the call ringing on `port`.
    pub fn answer(&self, port: &str) -> bool {
        let Some(entry) = self.inner.existing(port) else {
            return false;
        };
        let _ops = lock(&entry.ops);
        if lock(&entry.session).is_none() {
            log::warn!("[{port}] answer without a call session");
            return false;
        }
        if !entry.channel.send(&encode(&AtCommand::Answer)) {
            return false;
        }
        self.inner.transition(&entry, CallState::Active, None);
        true
    }

    /// Hang up on `port`. The session, if any, is finalized either way.
    ///
    /// Returns whether the hangup command was written.
    pub fn hangup(&self, port: &str) -> bool {
        let Some(entry) = self.inner.existing(port) else {
            return false;
        };
        let _ops = lock(&entry.ops);
        let sent = entry.channel.is_open() && entry.channel.send(&encode(&AtCommand::Hangup));
        self.inner.complete(&entry, EndReason::ManualHangup, None);
        sent
    }

    /// Send a text-mode SMS: mode, recipient, body + Ctrl+Z.
    pub fn send_sms(&self, port: &str, target: &str, body: &str) -> ModemResult<()> {
        let target = validate_number(target).map_err(|e| ModemError::Sms(e.to_string()))?;
        if body.contains(CTRL_Z) || body.contains(ESC) {
            return Err(ModemError::Sms(
                "Message body cannot contain Ctrl+Z or Escape".to_string(),
            ));
        }

        let config = &self.inner.config;
        let entry = self.inner.entry(port);
        let _ops = lock(&entry.ops);
        if !entry.channel.open() {
            return Err(ModemError::ChannelOpen(port.to_string()));
        }

        let steps = [
            (
                "text mode",
                AtCommand::SmsTextMode,
                Duration::from_millis(config.sms_mode_settle_ms),
            ),
            (
                "recipient",
                AtCommand::SmsRecipient(target.to_string()),
                Duration::from_millis(config.sms_recipient_settle_ms),
            ),
            ("body", AtCommand::SmsBody(body.to_string()), Duration::ZERO),
        ];
        for (step, command, settle) in steps {
            if !entry.channel.send(&encode(&command)) {
                return Err(ModemError::Sms(format!("{step} not accepted on {port}")));
            }
            if !settle.is_zero() {
                std::thread::sleep(settle);
            }
        }
        log::info!("[{port}] SMS sent to {target} ({} chars)", body.chars().count());
        Ok(())
    }

    pub fn status(&self, port: &str) -> Option<SessionSnapshot> {
        let entry = self.inner.existing(port)?;
        let session = lock(&entry.session);
        session.as_ref().map(CallSession::snapshot)
    }

    /// Start recording the call on `port`. Returns the file name in use.
    pub fn start_recording(&self, port: &str) -> Option<String> {
        let entry = self.inner.existing(port)?;
        let (name, update) = {
            let mut guard = lock(&entry.session);
            let session = guard.as_mut()?;
            if session.recording_state() == RecordingState::Recording {
                return session.recording_file_name().map(str::to_string);
            }
            let name = generate_file_name();
            session.start_recording(&name);
            (name, session.status_update())
        };
        self.inner.arm_capture(&entry, &name);
        self.inner.publish(&entry, update);
        log::info!("[{port}] recording started: {name}");
        Some(name)
    }

    /// Stop recording and fetch the file from the modem.
    pub fn stop_recording(&self, port: &str) -> bool {
        let Some(entry) = self.inner.existing(port) else {
            return false;
        };
        let (name, update) = {
            let mut guard = lock(&entry.session);
            let Some(session) = guard.as_mut() else {
                return false;
            };
            if !session.stop_recording() {
                return false;
            }
            let Some(name) = session.recording_file_name().map(str::to_string) else {
                return false;
            };
            (name, session.status_update())
        };
        self.inner.publish(&entry, update);
        self.inner.request_download(&entry, &name);
        true
    }

    /// Where a recording with this name is (or will be) saved
    pub fn recording_path(&self, file_name: &str) -> ModemResult<PathBuf> {
        self.inner.capture.recording_path(file_name)
    }

    /// Own number of the SIM in `port`, stamped onto its call records
    pub fn set_sim_phone(&self, port: &str, number: &str) {
        write(&self.inner.sim_phones).insert(port.to_string(), number.to_string());
    }

    /// End any session on `port` (`CLEANUP`), stop polling, close the port
    /// and drop its capture state. No-op for unknown ports.
    pub fn cleanup(&self, port: &str) {
        let Some(entry) = write(&self.inner.ports).remove(port) else {
            return;
        };
        let _ops = lock(&entry.ops);
        self.inner.complete(&entry, EndReason::Cleanup, None);
        self.inner.stop_polling(&entry);
        if let Some(watchdog) = lock(&entry.watchdog).take() {
            watchdog.cancel();
        }
        entry.channel.close();
        self.inner.capture.abort(port);
        log::info!("[{port}] cleaned up");
    }

    pub fn cleanup_all(&self) {
        let ports: Vec<String> = read(&self.inner.ports).keys().cloned().collect();
        for port in ports {
            self.cleanup(&port);
        }
    }

    /// Ports with a call session in flight
    pub fn active_ports(&self) -> Vec<String> {
        let mut ports: Vec<String> = read(&self.inner.ports)
            .values()
            .filter(|entry| lock(&entry.session).is_some())
            .map(|entry| entry.port.clone())
            .collect();
        ports.sort();
        ports
    }

    pub fn is_port_open(&self, port: &str) -> bool {
        self.inner
            .existing(port)
            .is_some_and(|entry| entry.channel.is_open())
    }

    /// Clean up every port, then stop the worker pool. Idempotent.
    pub fn shutdown(&self) {
        self.cleanup_all();
        self.inner.scheduler.shutdown();
    }
}

impl Drop for PortRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pause before a queued download checks the port again
const DOWNLOAD_RETRY: Duration = Duration::from_millis(250);

/// How long a download waits for the port when no download timeout is set
const DOWNLOAD_QUEUE_LIMIT: Duration = Duration::from_secs(120);

enum DownloadStart {
    Started(u64),
    /// Another download holds the port
    Busy,
    Failed,
}

/// Reasons after which a running recording is fetched from the modem
fn fetches_recording(reason: EndReason) -> bool {
    matches!(
        reason,
        EndReason::Completed | EndReason::AutoHangup | EndReason::ManualHangup
    )
}

impl Inner {
    fn existing(&self, port: &str) -> Option<Arc<PortEntry>> {
        read(&self.ports).get(port).cloned()
    }

    /// Entry for `port`, created (closed, observer wired) on first use.
    fn entry(self: &Arc<Self>, port: &str) -> Arc<PortEntry> {
        if let Some(entry) = self.existing(port) {
            return entry;
        }
        let mut ports = write(&self.ports);
        if let Some(entry) = ports.get(port) {
            return entry.clone();
        }

        let entry = Arc::new(PortEntry {
            port: port.to_string(),
            channel: SerialChannel::new(port, self.config.baud_rate, self.factory.clone()),
            session: Mutex::new(None),
            poller: Mutex::new(None),
            watchdog: Mutex::new(None),
            last_update: Mutex::new(None),
            ops: Mutex::new(()),
            downloading: AtomicBool::new(false),
            downloads: AtomicU64::new(0),
        });
        let weak_inner = Arc::downgrade(self);
        let weak_entry = Arc::downgrade(&entry);
        entry
            .channel
            .register_observer(Arc::new(move |raw: &[u8], text: &str| {
                if let (Some(inner), Some(entry)) = (weak_inner.upgrade(), weak_entry.upgrade()) {
                    inner.on_inbound(&entry, raw, text);
                }
            }));
        ports.insert(port.to_string(), entry.clone());
        entry
    }

    // -----------------------------------------------------------------------
    // Inbound path (reader thread)
    // -----------------------------------------------------------------------

    fn on_inbound(self: &Arc<Self>, entry: &Arc<PortEntry>, raw: &[u8], text: &str) {
        // Result codes inside downloaded audio are noise
        let downloading = entry.downloading.load(Ordering::SeqCst);
        if let Some(event) = self.capture.feed(&entry.port, raw, text) {
            self.on_capture_event(entry, event);
        }
        if downloading {
            return;
        }
        if let Some(notification) = scan_notification(text) {
            self.on_notification(entry, notification);
        }
    }

    fn on_notification(self: &Arc<Self>, entry: &Arc<PortEntry>, notification: Notification) {
        let port = &entry.port;
        let current = lock(&entry.session).as_ref().map(CallSession::id);

        match (notification, current) {
            (Notification::Disconnected(kind), Some(id)) => {
                log::info!("[{port}] modem reported {kind:?}");
                // Completion may download over the serial line; never on the reader thread.
                let inner = Arc::downgrade(self);
                let entry = Arc::downgrade(entry);
                self.scheduler.execute(move || {
                    if let (Some(inner), Some(entry)) = (inner.upgrade(), entry.upgrade()) {
                        inner.complete(&entry, EndReason::Completed, Some(id));
                    }
                });
            }
            (Notification::Incoming { caller }, None) => {
                if self.capture.is_capturing(port) {
                    return;
                }
                let session = CallSession::inbound(port, caller);
                log::info!(
                    "[{port}] incoming call from {}",
                    session.snapshot().caller_number.as_deref().unwrap_or("unknown")
                );
                let update = session.status_update();
                {
                    let mut guard = lock(&entry.session);
                    if guard.is_some() {
                        return;
                    }
                    *guard = Some(session);
                }
                self.publish(entry, update);
                self.start_polling(entry);
            }
            (notification, Some(id)) => {
                self.transition(entry, notification.call_state(), Some(id));
            }
            (_, None) => {}
        }
    }

    fn on_capture_event(&self, entry: &PortEntry, event: CaptureEvent) {
        match event {
            CaptureEvent::Started { file_name } => {
                log::info!("[{}] capturing unrequested audio into {file_name}", entry.port);
            }
            CaptureEvent::Saved(saved) => {
                entry.downloading.store(false, Ordering::SeqCst);
                if let Some(watchdog) = lock(&entry.watchdog).take() {
                    watchdog.cancel();
                }
                self.publish_recording(entry, RecordingState::Completed, &saved.file_name);
            }
            CaptureEvent::Failed { file_name, reason } => {
                entry.downloading.store(false, Ordering::SeqCst);
                if let Some(watchdog) = lock(&entry.watchdog).take() {
                    watchdog.cancel();
                }
                log::warn!("[{}] recording {file_name} failed: {reason}", entry.port);
                self.publish_recording(entry, RecordingState::Failed, &file_name);
            }
        }
    }

    // -----------------------------------------------------------------------
    // State transitions
    // -----------------------------------------------------------------------

    /// Feed `to` into the port's session. With `expected`, only if that
    /// session is still the current one.
    fn transition(self: &Arc<Self>, entry: &Arc<PortEntry>, to: CallState, expected: Option<Uuid>) {
        let update = {
            let mut guard = lock(&entry.session);
            let Some(session) = guard.as_mut() else {
                return;
            };
            if expected.is_some_and(|id| id != session.id()) {
                return;
            }
            let Transition::Changed {
                from,
                to,
                first_connect,
            } = session.advance(to, Utc::now())
            else {
                return;
            };
            log::info!("[{}] {from} -> {to}", entry.port);

            let max = session.max_duration_secs();
            if first_connect && max > 0 {
                let timer = self.arm_auto_hangup(entry, session.id(), max);
                session.set_hangup_timer(timer);
            }
            session.status_update()
        };
        self.publish(entry, update);
    }

    fn arm_auto_hangup(self: &Arc<Self>, entry: &Arc<PortEntry>, id: Uuid, max_secs: u32) -> TaskHandle {
        log::debug!("[{}] auto-hangup in {max_secs}s", entry.port);
        let inner = Arc::downgrade(self);
        let entry = Arc::downgrade(entry);
        self.scheduler
            .schedule_once(Duration::from_secs(u64::from(max_secs)), move || {
                let (Some(inner), Some(entry)) = (inner.upgrade(), entry.upgrade()) else {
                    return;
                };
                let current = lock(&entry.session).as_ref().map(CallSession::id);
                if current != Some(id) {
                    return;
                }
                log::info!("[{}] max duration reached, hanging up", entry.port);
                inner.stop_polling(&entry);
                entry.channel.send(&encode(&AtCommand::Hangup));
                inner.complete(&entry, EndReason::AutoHangup, Some(id));
            })
    }

    /// End the port's session for `reason`, persist it and, if a recording
    /// was running, fetch it. Returns false when there was nothing to end
    /// (or `expected` no longer names the current session).
    fn complete(self: &Arc<Self>, entry: &Arc<PortEntry>, reason: EndReason, expected: Option<Uuid>) -> bool {
        let taken = {
            let mut guard = lock(&entry.session);
            match guard.as_ref() {
                Some(session) if expected.map_or(true, |id| id == session.id()) => guard.take(),
                _ => None,
            }
        };
        let Some(mut session) = taken else {
            return false;
        };
        self.stop_polling(entry);

        let port = &entry.port;
        let was_recording = session.finish(Utc::now());
        let fetch = was_recording && fetches_recording(reason);
        if was_recording && !fetch {
            session.set_recording_state(RecordingState::Failed);
            if let Some(name) = session.recording_file_name() {
                self.capture.discard(port, name);
            }
        }
        log::info!(
            "[{port}] call ended: {reason} after {}s",
            session.duration_seconds()
        );
        self.publish(entry, session.status_update());

        let recording_path = session
            .recording_file_name()
            .and_then(|name| self.capture.recording_path(name).ok())
            .map(|path| path.display().to_string());
        let sim_phone = read(&self.sim_phones).get(port).cloned();
        let record = session.to_record(reason, &self.config.device, sim_phone, recording_path);
        if let Err(e) = self.repository.save(&record) {
            log::error!("[{port}] failed to persist call record {}: {e}", record.id);
        }

        if fetch {
            if let Some(name) = session.recording_file_name() {
                self.request_download(entry, name);
            }
        }
        true
    }

    // -----------------------------------------------------------------------
    // Status polling
    // -----------------------------------------------------------------------

    fn start_polling(self: &Arc<Self>, entry: &Arc<PortEntry>) {
        let interval = self.config.poll_interval();
        let inner = Arc::downgrade(self);
        let weak_entry = Arc::downgrade(entry);
        let handle = self.scheduler.schedule_repeating(interval, interval, move || {
            let (Some(inner), Some(entry)) = (inner.upgrade(), weak_entry.upgrade()) else {
                return false;
            };
            inner.poll(&entry);
            true
        });
        if let Some(previous) = lock(&entry.poller).replace(handle) {
            previous.cancel();
        }
    }

    fn stop_polling(&self, entry: &PortEntry) {
        if let Some(poller) = lock(&entry.poller).take() {
            poller.cancel();
        }
    }

    /// One `AT+CLCC` tick
    fn poll(self: &Arc<Self>, entry: &Arc<PortEntry>) {
        let Some(id) = lock(&entry.session).as_ref().map(CallSession::id) else {
            self.stop_polling(entry);
            return;
        };
        // Checked under the exchange guard: a download cannot start mid-poll
        let Some(reply) = entry.channel.send_and_await_if(
            &encode(&AtCommand::ListCalls),
            self.config.status_timeout(),
            || !entry.downloading.load(Ordering::SeqCst),
        ) else {
            return;
        };
        match decode_call_list(&reply) {
            CallList::NoReply => log::debug!("[{}] no call list reply", entry.port),
            CallList::Call(call) => self.transition(entry, call.call_state(), Some(id)),
            CallList::Idle => {
                let settled = lock(&entry.session)
                    .as_ref()
                    .filter(|session| session.id() == id)
                    .map(|session| {
                        session.is_observed() || session.age() >= self.config.no_call_grace()
                    });
                match settled {
                    Some(true) => {
                        self.complete(entry, EndReason::Completed, Some(id));
                    }
                    Some(false) => log::debug!("[{}] call not listed yet", entry.port),
                    None => {}
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Recording download
    // -----------------------------------------------------------------------

    /// Arm capture for a recording about to run, unless a download still
    /// owns the port's buffer; the file is armed again when fetched.
    fn arm_capture(&self, entry: &PortEntry, file_name: &str) {
        entry.channel.exclusive(|| {
            if entry.downloading.load(Ordering::SeqCst) {
                log::info!("[{}] download in progress, {file_name} armed when fetched", entry.port);
            } else {
                self.capture.start(&entry.port, file_name);
            }
        });
    }

    /// List the modem's files, pick the newest recording and stream it back
    /// into the capture pipeline as `file_name`. Queued while another
    /// download runs on the port.
    fn request_download(self: &Arc<Self>, entry: &Arc<PortEntry>, file_name: &str) {
        let wait = self.config.download_timeout().unwrap_or(DOWNLOAD_QUEUE_LIMIT);
        self.try_download(entry, file_name.to_string(), Instant::now() + wait);
    }

    fn try_download(self: &Arc<Self>, entry: &Arc<PortEntry>, file_name: String, queued_until: Instant) {
        let port = &entry.port;
        let idle = || !entry.downloading.load(Ordering::SeqCst);

        let started = match entry.channel.send_and_await_if(
            &encode(&AtCommand::ListFiles("*".to_string())),
            self.config.file_list_timeout(),
            idle,
        ) {
            None => DownloadStart::Busy,
            Some(listing) => match latest_recording_file(&listing) {
                None => {
                    log::warn!("[{port}] no recording found on modem");
                    DownloadStart::Failed
                }
                Some(remote) => self.start_download(entry, &remote, &file_name),
            },
        };

        match started {
            DownloadStart::Started(epoch) => self.arm_download_watchdog(entry, &file_name, epoch),
            DownloadStart::Failed => {
                self.capture.discard(port, &file_name);
                self.publish_recording(entry, RecordingState::Failed, &file_name);
            }
            DownloadStart::Busy if Instant::now() >= queued_until => {
                log::warn!("[{port}] gave up waiting to download {file_name}");
                self.capture.discard(port, &file_name);
                self.publish_recording(entry, RecordingState::Failed, &file_name);
            }
            DownloadStart::Busy => {
                log::debug!("[{port}] download busy, {file_name} queued");
                let inner = Arc::downgrade(self);
                let weak_entry = Arc::downgrade(entry);
                self.scheduler.schedule_once(DOWNLOAD_RETRY, move || {
                    if let (Some(inner), Some(entry)) = (inner.upgrade(), weak_entry.upgrade()) {
                        inner.try_download(&entry, file_name, queued_until);
                    }
                });
            }
        }
    }

    /// Claim the port for a download and write the request, all under the
    /// exchange guard.
    fn start_download(&self, entry: &PortEntry, remote: &str, file_name: &str) -> DownloadStart {
        let port = &entry.port;
        let download = encode(&AtCommand::DownloadFile(remote.to_string()));
        entry.channel.exclusive(|| {
            if entry.downloading.swap(true, Ordering::SeqCst) {
                return DownloadStart::Busy;
            }
            let epoch = entry.downloads.fetch_add(1, Ordering::SeqCst) + 1;
            self.capture.start(port, file_name);
            if entry.channel.send(&download) {
                log::info!("[{port}] downloading {remote} as {file_name}");
                DownloadStart::Started(epoch)
            } else {
                entry.downloading.store(false, Ordering::SeqCst);
                DownloadStart::Failed
            }
        })
    }

    fn arm_download_watchdog(self: &Arc<Self>, entry: &Arc<PortEntry>, file_name: &str, epoch: u64) {
        let Some(timeout) = self.config.download_timeout() else {
            return;
        };
        let inner = Arc::downgrade(self);
        let weak_entry = Arc::downgrade(entry);
        let name = file_name.to_string();
        let watchdog = self.scheduler.schedule_once(timeout, move || {
            let (Some(inner), Some(entry)) = (inner.upgrade(), weak_entry.upgrade()) else {
                return;
            };
            if entry.downloads.load(Ordering::SeqCst) != epoch {
                return;
            }
            match inner.capture.expire(&entry.port, &name) {
                Some(event) => inner.on_capture_event(&entry, event),
                None => {
                    // Buffer already finalized or gone; the port must not stay claimed
                    if entry.downloading.swap(false, Ordering::SeqCst) {
                        log::warn!("[{}] download of {name} lost its buffer", entry.port);
                    }
                }
            }
        });
        if let Some(previous) = lock(&entry.watchdog).replace(watchdog) {
            previous.cancel();
        }
    }

    // -----------------------------------------------------------------------
    // Broadcast
    // -----------------------------------------------------------------------

    fn publish(&self, entry: &PortEntry, update: StatusUpdate) {
        if let Err(e) = self.broadcaster.publish(&update) {
            log::warn!("[{}] status broadcast failed: {e}", entry.port);
        }
        *lock(&entry.last_update) = Some(update);
    }

    /// Recording outcome, reported against the session if it is still live,
    /// otherwise against the last state broadcast for the port.
    fn publish_recording(&self, entry: &PortEntry, state: RecordingState, file_name: &str) {
        let live = {
            let mut guard = lock(&entry.session);
            guard
                .as_mut()
                .filter(|session| session.recording_file_name() == Some(file_name))
                .map(|session| {
                    session.set_recording_state(state);
                    session.status_update()
                })
        };
        let update = live.unwrap_or_else(|| {
            let mut update = lock(&entry.last_update).clone().unwrap_or(StatusUpdate {
                com_port: entry.port.clone(),
                call_state: CallState::Ended,
                recording_state: state,
                target_number: None,
                duration_seconds: 0,
                start_time: None,
                connect_time: None,
                end_time: None,
                recording_file_name: None,
            });
            update.recording_state = state;
            update.recording_file_name = Some(file_name.to_string());
            update
        });
        log::info!("[{}] recording {file_name}: {state}", entry.port);
        self.publish(entry, update);
    }
}
