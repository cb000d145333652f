//! Call session state machine
//!
//! Pure bookkeeping for one call on one port. The registry feeds it states
//! from two racing sources (passive notifications and the status poll) and
//! acts on the `Transition` it returns; nothing in here touches I/O.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    CallDirection, CallRecord, CallState, DeviceIdentity, EndReason, RecordingState,
    SessionSnapshot, StatusUpdate,
};
use crate::scheduler::TaskHandle;

/// Result of feeding a state into a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Changed {
        from: CallState,
        to: CallState,
        /// True exactly once per session: the first entry into `Active`
        first_connect: bool,
    },
}

#[derive(Debug)]
pub struct CallSession {
    port: String,
    direction: CallDirection,
    target_number: Option<String>,
    caller_number: Option<String>,
    order_id: String,
    session_id: Uuid,
    state: CallState,
    recording_state: RecordingState,
    start_time: DateTime<Utc>,
    connect_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    recording_file_name: Option<String>,
    max_duration_secs: u32,
    hangup_timer: Option<TaskHandle>,
    /// Set once the modem itself has reported this call
    observed: bool,
    created: Instant,
}

impl CallSession {
    pub fn outbound(port: &str, target: &str, max_duration_secs: u32) -> Self {
        Self::new(
            port,
            CallDirection::Outbound,
            CallState::Dialing,
            Some(target.to_string()),
            None,
            max_duration_secs,
        )
    }

    /// Session for an unsolicited ring. The modem has already seen this call.
    pub fn inbound(port: &str, caller: Option<String>) -> Self {
        let mut session = Self::new(port, CallDirection::Inbound, CallState::Incoming, None, caller, 0);
        session.observed = true;
        session
    }

    fn new(
        port: &str,
        direction: CallDirection,
        state: CallState,
        target_number: Option<String>,
        caller_number: Option<String>,
        max_duration_secs: u32,
    ) -> Self {
        Self {
            port: port.to_string(),
            direction,
            target_number,
            caller_number,
            order_id: Uuid::new_v4().to_string(),
            session_id: Uuid::new_v4(),
            state,
            recording_state: RecordingState::Idle,
            start_time: Utc::now(),
            connect_time: None,
            end_time: None,
            recording_file_name: None,
            max_duration_secs,
            hangup_timer: None,
            observed: false,
            created: Instant::now(),
        }
    }

    /// Unique per session; lets timers detect they belong to a replaced call.
    pub fn id(&self) -> Uuid {
        self.session_id
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn recording_state(&self) -> RecordingState {
        self.recording_state
    }

    pub fn recording_file_name(&self) -> Option<&str> {
        self.recording_file_name.as_deref()
    }

    pub fn max_duration_secs(&self) -> u32 {
        self.max_duration_secs
    }

    pub fn is_observed(&self) -> bool {
        self.observed
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Move towards `to`.
    ///
    /// `Ended` is reached only through `finish`. Once connected, a call
    /// never goes back to a pre-connect state; late or reordered progress
    /// reports are ignored.
    pub fn advance(&mut self, to: CallState, now: DateTime<Utc>) -> Transition {
        if self.state.is_terminal() || to.is_terminal() {
            return Transition::Unchanged;
        }
        self.observed = true;
        if to == self.state || self.state == CallState::Active {
            return Transition::Unchanged;
        }

        let from = self.state;
        self.state = to;
        let first_connect = to == CallState::Active && self.connect_time.is_none();
        if first_connect {
            self.connect_time = Some(now);
        }
        Transition::Changed {
            from,
            to,
            first_connect,
        }
    }

    pub fn set_hangup_timer(&mut self, timer: TaskHandle) {
        if let Some(previous) = self.hangup_timer.replace(timer) {
            previous.cancel();
        }
    }

    pub fn start_recording(&mut self, file_name: &str) {
        self.recording_file_name = Some(file_name.to_string());
        self.recording_state = RecordingState::Recording;
    }

    /// `Recording` → `Downloading`. Returns false from any other state.
    pub fn stop_recording(&mut self) -> bool {
        if self.recording_state != RecordingState::Recording {
            return false;
        }
        self.recording_state = RecordingState::Downloading;
        true
    }

    pub fn set_recording_state(&mut self, state: RecordingState) {
        self.recording_state = state;
    }

    /// Enter `Ended`.
    ///
    /// Cancels the auto-hangup timer and, if a recording was running, moves
    /// it to `Downloading`. Returns true when the caller should fetch the
    /// recording from the modem.
    pub fn finish(&mut self, now: DateTime<Utc>) -> bool {
        if let Some(timer) = self.hangup_timer.take() {
            timer.cancel();
        }
        if self.end_time.is_none() {
            self.end_time = Some(now);
        }
        self.state = CallState::Ended;
        self.stop_recording()
    }

    /// Whole seconds from connect to end (or to now while connected); 0 if never connected.
    pub fn duration_seconds(&self) -> u32 {
        let Some(connect) = self.connect_time else {
            return 0;
        };
        let end = self.end_time.unwrap_or_else(Utc::now);
        (end - connect).num_seconds().max(0) as u32
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            com_port: self.port.clone(),
            direction: self.direction,
            target_number: self.target_number.clone(),
            caller_number: self.caller_number.clone(),
            order_id: self.order_id.clone(),
            call_state: self.state,
            recording_state: self.recording_state,
            start_time: self.start_time,
            connect_time: self.connect_time,
            end_time: self.end_time,
            duration_seconds: self.duration_seconds(),
            max_duration_seconds: self.max_duration_secs,
            recording_file_name: self.recording_file_name.clone(),
        }
    }

    pub fn status_update(&self) -> StatusUpdate {
        StatusUpdate {
            com_port: self.port.clone(),
            call_state: self.state,
            recording_state: self.recording_state,
            target_number: self.target_number.clone(),
            duration_seconds: self.duration_seconds(),
            start_time: Some(self.start_time),
            connect_time: self.connect_time,
            end_time: self.end_time,
            recording_file_name: self.recording_file_name.clone(),
        }
    }

    /// The persisted summary. Call after `finish`.
    pub fn to_record(
        &self,
        reason: EndReason,
        device: &DeviceIdentity,
        sim_phone: Option<String>,
        recording_path: Option<String>,
    ) -> CallRecord {
        let end_time = self.end_time.unwrap_or_else(Utc::now);
        CallRecord {
            id: Uuid::new_v4().to_string(),
            order_id: self.order_id.clone(),
            device_id: device.id.clone(),
            device_name: device.name.clone(),
            device_location: device.location.clone(),
            com_port: self.port.clone(),
            sim_phone,
            from_number: self.caller_number.clone(),
            target_number: self.target_number.clone(),
            call_state: reason.as_str().to_string(),
            start_time: self.start_time,
            connect_time: self.connect_time,
            end_time,
            duration_seconds: self.duration_seconds(),
            recording_file_name: self.recording_file_name.clone(),
            recording_file_path: recording_path,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn outbound_starts_dialing_unobserved() {
        let session = CallSession::outbound("COM5", "0987654321", 30);
        assert_eq!(session.state(), CallState::Dialing);
        assert_eq!(session.recording_state(), RecordingState::Idle);
        assert!(!session.is_observed());
        assert_eq!(session.snapshot().target_number.as_deref(), Some("0987654321"));
    }

    #[test]
    fn inbound_starts_incoming() {
        let session = CallSession::inbound("COM5", Some("0912345678".into()));
        assert_eq!(session.state(), CallState::Incoming);
        assert!(session.is_observed());
        assert_eq!(session.snapshot().caller_number.as_deref(), Some("0912345678"));
    }

    #[test]
    fn first_connect_sets_connect_time_once() {
        let mut session = CallSession::outbound("COM5", "0987654321", 0);
        let t1 = Utc::now();
        assert_eq!(
            session.advance(CallState::Active, t1),
            Transition::Changed {
                from: CallState::Dialing,
                to: CallState::Active,
                first_connect: true
            }
        );
        let t2 = t1 + ChronoDuration::seconds(5);
        assert_eq!(session.advance(CallState::Active, t2), Transition::Unchanged);
        assert_eq!(session.snapshot().connect_time, Some(t1));
    }

    #[test]
    fn no_regression_after_connect() {
        let mut session = CallSession::outbound("COM5", "0987654321", 0);
        session.advance(CallState::Active, Utc::now());
        assert_eq!(session.advance(CallState::Ringing, Utc::now()), Transition::Unchanged);
        assert_eq!(session.state(), CallState::Active);
    }

    #[test]
    fn progress_marks_session_observed() {
        let mut session = CallSession::outbound("COM5", "0987654321", 0);
        session.advance(CallState::Dialing, Utc::now());
        assert!(session.is_observed());
        session.advance(CallState::Ringing, Utc::now());
        assert_eq!(session.state(), CallState::Ringing);
    }

    #[test]
    fn ended_is_terminal() {
        let mut session = CallSession::outbound("COM5", "0987654321", 0);
        session.finish(Utc::now());
        assert_eq!(session.state(), CallState::Ended);
        assert_eq!(session.advance(CallState::Active, Utc::now()), Transition::Unchanged);
        assert!(session.snapshot().connect_time.is_none());
    }

    #[test]
    fn finish_cancels_hangup_timer() {
        let mut session = CallSession::outbound("COM5", "0987654321", 30);
        let timer = TaskHandle::default();
        session.set_hangup_timer(timer.clone());
        session.finish(Utc::now());
        assert!(timer.is_cancelled());
    }

    #[test]
    fn finish_moves_recording_to_downloading() {
        let mut session = CallSession::outbound("COM5", "0987654321", 0);
        session.start_recording("call_1");
        assert!(session.finish(Utc::now()));
        assert_eq!(session.recording_state(), RecordingState::Downloading);

        let mut plain = CallSession::outbound("COM6", "0987654321", 0);
        assert!(!plain.finish(Utc::now()));
        assert_eq!(plain.recording_state(), RecordingState::Idle);
    }

    #[test]
    fn duration_is_connect_to_end() {
        let mut session = CallSession::outbound("COM5", "0987654321", 0);
        let connect = Utc::now();
        session.advance(CallState::Active, connect);
        session.finish(connect + ChronoDuration::milliseconds(30_400));
        assert_eq!(session.duration_seconds(), 30);
    }

    #[test]
    fn never_connected_has_zero_duration() {
        let mut session = CallSession::outbound("COM5", "0987654321", 0);
        session.finish(Utc::now() + ChronoDuration::seconds(10));
        assert_eq!(session.duration_seconds(), 0);
    }

    #[test]
    fn record_carries_reason_and_device() {
        let mut session = CallSession::outbound("COM5", "0987654321", 30);
        session.start_recording("call_9");
        session.advance(CallState::Active, Utc::now());
        session.finish(Utc::now());
        let device = DeviceIdentity::default();
        let record = session.to_record(
            EndReason::AutoHangup,
            &device,
            Some("0911111111".into()),
            Some("recordings/call_9.wav".into()),
        );
        assert_eq!(record.call_state, "AUTO_HANGUP");
        assert_eq!(record.device_name, "GSM-Node-01");
        assert_eq!(record.com_port, "COM5");
        assert_eq!(record.sim_phone.as_deref(), Some("0911111111"));
        assert_eq!(record.recording_file_name.as_deref(), Some("call_9"));
        assert!(record.connect_time.unwrap() <= record.end_time);

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["callState"], "AUTO_HANGUP");
        assert_eq!(json["targetNumber"], "0987654321");
    }
}
