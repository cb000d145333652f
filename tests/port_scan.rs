//! SIM probing and concurrent port scan against mock modems

mod common;

use std::sync::Arc;

use common::test_config;
use modemcall_lib::adapters::MockModemFactory;
use modemcall_lib::PortScanner;

fn scanner(factory: &Arc<MockModemFactory>, dir: &tempfile::TempDir) -> PortScanner {
    PortScanner::new(factory.clone(), test_config(dir))
}

#[test]
fn probe_reads_sim_identity() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockModemFactory::with_ports(&["COM5"]));

    let info = scanner(&factory, &dir).probe("COM5");
    assert!(info.available);
    assert_eq!(info.status, "Ready");
    assert_eq!(info.phone_number.as_deref(), Some("0900000001"));
    assert_eq!(info.carrier.as_deref(), Some("MOCKTEL"));
    assert_eq!(info.imei.as_deref(), Some("860000000000001"));
    let signal = info.signal.unwrap();
    assert_eq!(signal.rssi, 23);
    assert_eq!(signal.quality, "Excellent");

    let written = factory.modem("COM5").unwrap().written();
    assert_eq!(written.first().map(String::as_str), Some("AT+CNUM"));
    assert!(!written.contains(&"AT+CPBR=1".to_string()));
}

#[test]
fn missing_own_number_falls_back_to_phonebook() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockModemFactory::with_ports(&["COM5"]));
    factory.modem("COM5").unwrap().set_own_number(None);

    let info = scanner(&factory, &dir).probe("COM5");
    assert_eq!(info.status, "Ready");
    assert_eq!(info.phone_number, None);
    assert_eq!(info.carrier.as_deref(), Some("MOCKTEL"));
    assert!(factory
        .modem("COM5")
        .unwrap()
        .written()
        .contains(&"AT+CPBR=1".to_string()));
}

#[test]
fn unreachable_ports_are_reported_not_raised() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockModemFactory::with_ports(&["COM5", "COM6"]));
    factory.modem("COM5").unwrap().set_fail_open(true);
    factory.modem("COM6").unwrap().set_silent(true);
    let scanner = scanner(&factory, &dir);

    let blocked = scanner.probe("COM5");
    assert!(!blocked.available);
    assert_eq!(blocked.status, "Cannot open port");

    let silent = scanner.probe("COM6");
    assert!(!silent.available);
    assert_eq!(silent.status, "No response");
    assert!(silent.signal.is_none());
}

#[test]
fn scan_all_keeps_listing_order() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(MockModemFactory::with_ports(&["COM7", "COM5", "COM6"]));
    factory.modem("COM6").unwrap().set_fail_open(true);

    let results = scanner(&factory, &dir).scan_all().unwrap();
    let ports: Vec<&str> = results.iter().map(|r| r.com_port.as_str()).collect();
    assert_eq!(ports, vec!["COM5", "COM6", "COM7"]);
    assert!(results[0].available);
    assert!(!results[1].available);
    assert!(results[2].available);
}
