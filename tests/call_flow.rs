//! Call lifecycle through the full registry and mock modems
//!
//! Every test drives a real `PortRegistry` (reader threads, scheduler,
//! status poller) against `MockModemFactory`; only the modem is simulated.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{Harness, ACTIVE_CALL, TARGET};
use modemcall_lib::domain::{CallState, ModemError};

// --- Outbound calls ---

#[test]
fn dial_connect_and_auto_hangup() {
    let h = Harness::new(&["COM5"]);
    let modem = h.modem("COM5");
    modem.set_call_list(Some(ACTIVE_CALL));

    let recording = h.registry.place_call("COM5", TARGET, false, 1).unwrap();
    assert_eq!(recording, None);
    assert!(modem.written().contains(&"ATD0987654321;".to_string()));

    modem.push_inbound("\r\n^CONN:1,0\r\n");
    h.wait_for_state("COM5", CallState::Active);
    let connected = h.registry.status("COM5").unwrap();
    assert!(connected.connect_time.is_some());
    assert_eq!(connected.max_duration_seconds, 1);

    let records = h.wait_for_records(1);
    let record = &records[0];
    assert_eq!(record.call_state, "AUTO_HANGUP");
    assert_eq!(record.com_port, "COM5");
    assert_eq!(record.target_number.as_deref(), Some(TARGET));
    assert!((1..=2).contains(&record.duration_seconds), "{}", record.duration_seconds);
    assert_eq!(record.connect_time, connected.connect_time);
    assert!(record.start_time <= record.connect_time.unwrap());
    assert!(record.connect_time.unwrap() <= record.end_time);

    assert!(modem.written().contains(&"ATH".to_string()));
    assert!(h.registry.status("COM5").is_none());

    let mut states: Vec<CallState> = h
        .drain_updates("COM5")
        .into_iter()
        .map(|u| u.call_state)
        .collect();
    states.dedup();
    assert_eq!(states, vec![CallState::Dialing, CallState::Active, CallState::Ended]);
}

#[test]
fn passive_no_carrier_completes_call() {
    let h = Harness::new(&["COM5"]);
    let modem = h.modem("COM5");
    modem.set_call_list(Some(ACTIVE_CALL));

    h.registry.place_call("COM5", TARGET, false, 0).unwrap();
    modem.push_inbound("\r\n^CONF:1\r\n");
    modem.push_inbound("\r\nCONNECT\r\n");
    h.wait_for_state("COM5", CallState::Active);

    modem.push_inbound("\r\nNO CARRIER\r\n");
    let records = h.wait_for_records(1);
    assert_eq!(records[0].call_state, "COMPLETED");
    assert!(records[0].connect_time.is_some());
    assert!(h.registry.status("COM5").is_none());
}

#[test]
fn poll_drives_state_and_detects_end() {
    let h = Harness::new(&["COM5"]);
    let modem = h.modem("COM5");
    modem.set_call_list(Some("+CLCC: 1,0,3,0,0,\"0987654321\",129"));

    h.registry.place_call("COM5", TARGET, false, 0).unwrap();
    h.wait_for_state("COM5", CallState::Ringing);

    modem.set_call_list(Some(ACTIVE_CALL));
    h.wait_for_state("COM5", CallState::Active);

    modem.set_call_list(None);
    let records = h.wait_for_records(1);
    assert_eq!(records[0].call_state, "COMPLETED");
}

#[test]
fn unlisted_call_ends_after_grace_period() {
    let h = Harness::new(&["COM5"]);
    let started = Instant::now();
    h.registry.place_call("COM5", TARGET, false, 0).unwrap();

    // Not listed yet: the session survives the first empty polls
    thread::sleep(Duration::from_millis(150));
    assert_eq!(h.registry.status("COM5").unwrap().call_state, CallState::Dialing);

    let records = h.wait_for_records(1);
    assert!(started.elapsed() >= Duration::from_millis(400));
    assert_eq!(records[0].call_state, "COMPLETED");
    assert_eq!(records[0].duration_seconds, 0);
    assert!(records[0].connect_time.is_none());
}

#[test]
fn silent_modem_does_not_end_call() {
    let h = Harness::new(&["COM5"]);
    let modem = h.modem("COM5");
    h.registry.place_call("COM5", TARGET, false, 0).unwrap();
    modem.push_inbound("\r\n^ORIG:1,0\r\n");
    modem.set_silent(true);

    thread::sleep(Duration::from_millis(700));
    assert!(h.registry.status("COM5").is_some());
    assert!(h.records.all().is_empty());
}

#[test]
fn manual_hangup_persists_once() {
    let h = Harness::new(&["COM5"]);
    let modem = h.modem("COM5");
    modem.set_call_list(Some(ACTIVE_CALL));
    h.registry.place_call("COM5", TARGET, false, 30).unwrap();
    h.wait_for_state("COM5", CallState::Active);

    assert!(h.registry.hangup("COM5"));
    let records = h.wait_for_records(1);
    assert_eq!(records[0].call_state, "MANUAL_HANGUP");

    // No session left: still sends ATH, writes nothing new
    assert!(h.registry.hangup("COM5"));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.records.all().len(), 1);
}

#[test]
fn hangup_on_unknown_port_is_false() {
    let h = Harness::new(&["COM5"]);
    assert!(!h.registry.hangup("COM9"));
    assert!(!h.registry.answer("COM9"));
}

#[test]
fn new_call_replaces_previous_session() {
    let h = Harness::new(&["COM5"]);
    h.modem("COM5").set_call_list(Some(ACTIVE_CALL));
    let first = {
        h.registry.place_call("COM5", TARGET, false, 0).unwrap();
        h.registry.status("COM5").unwrap().order_id
    };
    h.registry.place_call("COM5", "0911222333", false, 0).unwrap();

    let records = h.wait_for_records(1);
    assert_eq!(records[0].call_state, "REPLACED");
    assert_eq!(records[0].order_id, first);

    let current = h.registry.status("COM5").unwrap();
    assert_ne!(current.order_id, first);
    assert_eq!(current.target_number.as_deref(), Some("0911222333"));
    assert_eq!(h.registry.active_ports(), vec!["COM5".to_string()]);
}

#[test]
fn open_failure_is_reported() {
    let h = Harness::new(&["COM5"]);
    h.modem("COM5").set_fail_open(true);
    match h.registry.place_call("COM5", TARGET, false, 0) {
        Err(ModemError::ChannelOpen(port)) => assert_eq!(port, "COM5"),
        other => panic!("expected ChannelOpen, got {other:?}"),
    }
    assert!(matches!(
        h.registry.place_call("COM8", TARGET, false, 0),
        Err(ModemError::ChannelOpen(_))
    ));
    assert!(h.registry.status("COM5").is_none());
    assert!(!h.registry.is_port_open("COM5"));
}

#[test]
fn invalid_number_is_rejected_before_dialing() {
    let h = Harness::new(&["COM5"]);
    assert!(h.registry.place_call("COM5", "123;ATH", false, 0).is_err());
    assert!(h.modem("COM5").written().is_empty());
}

// --- Inbound calls ---

#[test]
fn ring_creates_inbound_session_and_answer_connects() {
    let h = Harness::new(&["COM5"]);
    let modem = h.modem("COM5");
    modem.set_call_list(Some("+CLCC: 1,1,4,0,0,\"0912345678\",129"));
    assert!(h.registry.open("COM5"));

    modem.push_inbound("\r\nRING\r\n\r\n+CLIP: \"0912345678\",129,\"\",0,\"\",0\r\n");
    h.wait_for_state("COM5", CallState::Incoming);
    let ringing = h.registry.status("COM5").unwrap();
    assert_eq!(ringing.caller_number.as_deref(), Some("0912345678"));

    modem.set_call_list(Some("+CLCC: 1,1,0,0,0,\"0912345678\",129"));
    assert!(h.registry.answer("COM5"));
    assert!(modem.written().contains(&"ATA".to_string()));
    assert_eq!(h.registry.status("COM5").unwrap().call_state, CallState::Active);

    assert!(h.registry.hangup("COM5"));
    let records = h.wait_for_records(1);
    assert_eq!(records[0].from_number.as_deref(), Some("0912345678"));
    assert_eq!(records[0].target_number, None);
    assert_eq!(records[0].call_state, "MANUAL_HANGUP");
}

#[test]
fn answer_without_session_fails() {
    let h = Harness::new(&["COM5"]);
    assert!(h.registry.open("COM5"));
    assert!(!h.registry.answer("COM5"));
    assert!(!h.modem("COM5").written().contains(&"ATA".to_string()));
}

// --- Cleanup ---

#[test]
fn cleanup_is_idempotent() {
    let h = Harness::new(&["COM5"]);
    h.modem("COM5").set_call_list(Some(ACTIVE_CALL));
    h.registry.place_call("COM5", TARGET, true, 30).unwrap();
    assert!(h.registry.is_port_open("COM5"));

    h.registry.cleanup("COM5");
    h.registry.cleanup("COM5");
    h.registry.cleanup("COM7");

    let records = h.wait_for_records(1);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(h.records.all().len(), 1);
    assert_eq!(records[0].call_state, "CLEANUP");
    assert!(h.registry.status("COM5").is_none());
    assert!(!h.registry.is_port_open("COM5"));
    assert!(h.registry.active_ports().is_empty());
}

#[test]
fn polling_stops_for_good_after_cleanup() {
    let h = Harness::new(&["COM5"]);
    let modem = h.modem("COM5");
    modem.set_call_list(Some(ACTIVE_CALL));
    h.registry.place_call("COM5", TARGET, false, 0).unwrap();
    h.wait_for_state("COM5", CallState::Active);

    h.registry.cleanup("COM5");
    let polls = |written: Vec<String>| written.iter().filter(|c| *c == "AT+CLCC").count();
    let after_cleanup = polls(modem.written());
    thread::sleep(Duration::from_millis(300));
    assert_eq!(polls(modem.written()), after_cleanup);
}

#[test]
fn auto_hangup_never_fires_after_cleanup() {
    let h = Harness::new(&["COM5"]);
    let modem = h.modem("COM5");
    modem.set_call_list(Some(ACTIVE_CALL));
    h.registry.place_call("COM5", TARGET, false, 1).unwrap();
    modem.push_inbound("\r\n^CONN:1,0\r\n");
    h.wait_for_state("COM5", CallState::Active);

    h.registry.cleanup("COM5");
    thread::sleep(Duration::from_millis(1500));
    assert!(!modem.written().contains(&"ATH".to_string()));
    let records = h.records.all();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].call_state, "CLEANUP");
}

#[test]
fn cleanup_all_ends_every_port() {
    let h = Harness::new(&["COM5", "COM6"]);
    for port in ["COM5", "COM6"] {
        h.modem(port).set_call_list(Some(ACTIVE_CALL));
        h.registry.place_call(port, TARGET, false, 0).unwrap();
    }
    assert_eq!(h.registry.active_ports().len(), 2);

    h.registry.cleanup_all();
    let records = h.wait_for_records(2);
    assert!(records.iter().all(|r| r.call_state == "CLEANUP"));
    assert!(h.registry.active_ports().is_empty());
}

// --- Concurrency ---

#[test]
fn calls_on_different_ports_run_in_parallel() {
    let h = Harness::new(&["COM5", "COM6"]);
    for port in ["COM5", "COM6"] {
        let modem = h.modem(port);
        modem.set_call_list(Some(ACTIVE_CALL));
        modem.set_write_delay(Duration::from_millis(300));
    }

    let started = Instant::now();
    thread::scope(|scope| {
        for port in ["COM5", "COM6"] {
            let registry = &h.registry;
            scope.spawn(move || registry.place_call(port, TARGET, false, 0).unwrap());
        }
    });
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_millis(550), "took {elapsed:?}");
    assert!(h.registry.status("COM5").is_some());
    assert!(h.registry.status("COM6").is_some());
}

#[test]
fn at_most_one_session_per_port() {
    let h = Harness::new(&["COM5"]);
    h.modem("COM5").set_call_list(Some(ACTIVE_CALL));
    thread::scope(|scope| {
        for _ in 0..4 {
            let registry = &h.registry;
            scope.spawn(move || registry.place_call("COM5", TARGET, false, 0).unwrap());
        }
    });
    // Three of the four were replaced, one is live
    let records = h.wait_for_records(3);
    assert!(records.iter().all(|r| r.call_state == "REPLACED"));
    assert!(h.registry.status("COM5").is_some());
    thread::sleep(Duration::from_millis(200));
    assert_eq!(h.records.all().len(), 3);
}

// --- SMS ---

#[test]
fn sms_writes_three_steps_in_order() {
    let h = Harness::new(&["COM5"]);
    h.registry.send_sms("COM5", TARGET, "hello").unwrap();
    assert_eq!(
        h.modem("COM5").written(),
        vec![
            "AT+CMGF=1".to_string(),
            "AT+CMGS=\"0987654321\"".to_string(),
            "hello\u{1A}".to_string(),
        ]
    );
}

#[test]
fn sms_rejects_control_characters() {
    let h = Harness::new(&["COM5"]);
    assert!(matches!(
        h.registry.send_sms("COM5", TARGET, "bad\u{1A}body"),
        Err(ModemError::Sms(_))
    ));
    assert!(matches!(
        h.registry.send_sms("COM5", "not-a-number", "hi"),
        Err(ModemError::Sms(_))
    ));
    assert!(h.modem("COM5").written().is_empty());
}

#[test]
fn sms_on_unopenable_port_fails() {
    let h = Harness::new(&["COM5"]);
    h.modem("COM5").set_fail_open(true);
    assert!(matches!(
        h.registry.send_sms("COM5", TARGET, "hi"),
        Err(ModemError::ChannelOpen(_))
    ));
}

// --- Records ---

#[test]
fn record_carries_device_identity_and_sim_phone() {
    let h = Harness::new(&["COM5"]);
    h.registry.set_sim_phone("COM5", "0900000001");
    h.modem("COM5").set_call_list(Some(ACTIVE_CALL));
    h.registry.place_call("COM5", TARGET, false, 0).unwrap();
    h.registry.hangup("COM5");

    let record = &h.wait_for_records(1)[0];
    assert_eq!(record.device_id, "default-device");
    assert_eq!(record.device_name, "GSM-Node-01");
    assert_eq!(record.device_location, "Unknown");
    assert_eq!(record.sim_phone.as_deref(), Some("0900000001"));
}
