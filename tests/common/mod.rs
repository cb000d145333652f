//! Shared harness: a registry wired to mock modems, an in-memory record
//! store and a channel broadcaster. `FailingHarness` swaps the last two for
//! collaborators that reject everything.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use tempfile::TempDir;

use modemcall_lib::adapters::{ChannelBroadcaster, InMemoryCallRecords, MockModem, MockModemFactory};
use modemcall_lib::domain::{CallRecord, CallState, EngineConfig, ModemError, ModemResult, StatusUpdate};
use modemcall_lib::ports::{CallRecordRepository, Page, PageRequest, RecordFilter, StatusBroadcaster};
use modemcall_lib::PortRegistry;

pub const TARGET: &str = "0987654321";
pub const ACTIVE_CALL: &str = "+CLCC: 1,0,0,0,0,\"0987654321\",129";

pub struct Harness {
    pub registry: PortRegistry,
    pub factory: Arc<MockModemFactory>,
    pub records: Arc<InMemoryCallRecords>,
    pub updates: Receiver<StatusUpdate>,
    pub dir: TempDir,
}

/// Fast timings so tests finish in well under a second per call
pub fn test_config(dir: &TempDir) -> EngineConfig {
    EngineConfig {
        recording_dir: dir.path().join("recordings"),
        records_path: dir.path().join("calls.jsonl"),
        poll_interval_ms: 50,
        status_timeout_ms: 300,
        file_list_timeout_ms: 500,
        sms_mode_settle_ms: 0,
        sms_recipient_settle_ms: 0,
        no_call_grace_ms: 400,
        probe_settle_ms: 0,
        download_timeout_secs: 5,
        worker_threads: 4,
        ..EngineConfig::default()
    }
}

impl Harness {
    pub fn new(ports: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::with_config(ports, test_config(&dir), dir)
    }

    pub fn with_config(ports: &[&str], config: EngineConfig, dir: TempDir) -> Self {
        let factory = Arc::new(MockModemFactory::with_ports(ports));
        let records = Arc::new(InMemoryCallRecords::new());
        let (broadcaster, updates) = ChannelBroadcaster::channel();
        let registry = PortRegistry::new(
            config,
            factory.clone(),
            records.clone(),
            Arc::new(broadcaster),
        );
        Self {
            registry,
            factory,
            records,
            updates,
            dir,
        }
    }

    pub fn modem(&self, port: &str) -> MockModem {
        self.factory.modem(port).unwrap()
    }

    /// Wait until `n` call records have been saved
    pub fn wait_for_records(&self, n: usize) -> Vec<CallRecord> {
        assert!(
            wait_until(Duration::from_secs(5), || self.records.all().len() >= n),
            "expected {n} call records, got {}",
            self.records.all().len()
        );
        self.records.all()
    }

    pub fn wait_for_state(&self, port: &str, state: CallState) {
        assert!(
            wait_until(Duration::from_secs(5), || {
                self.registry.status(port).map(|s| s.call_state) == Some(state)
            }),
            "{port} never reached {state}"
        );
    }

    /// Every update broadcast so far for `port`
    pub fn drain_updates(&self, port: &str) -> Vec<StatusUpdate> {
        self.updates
            .try_iter()
            .filter(|u| u.com_port == port)
            .collect()
    }
}

/// Record store whose every save fails
#[derive(Default)]
pub struct FailingRecords {
    pub saves: AtomicUsize,
}

impl CallRecordRepository for FailingRecords {
    fn save(&self, _record: &CallRecord) -> ModemResult<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        Err(ModemError::Repository("disk full".into()))
    }

    fn query(&self, _filter: &RecordFilter, _page: PageRequest) -> ModemResult<Page<CallRecord>> {
        Err(ModemError::Repository("disk full".into()))
    }
}

/// Broadcaster whose every publish fails
#[derive(Default)]
pub struct FailingBroadcaster {
    pub publishes: AtomicUsize,
}

impl StatusBroadcaster for FailingBroadcaster {
    fn publish(&self, _update: &StatusUpdate) -> ModemResult<()> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        Err(ModemError::Broadcast("no listeners".into()))
    }
}

pub struct FailingHarness {
    pub registry: PortRegistry,
    pub factory: Arc<MockModemFactory>,
    pub records: Arc<FailingRecords>,
    pub broadcaster: Arc<FailingBroadcaster>,
    pub dir: TempDir,
}

impl FailingHarness {
    pub fn new(ports: &[&str]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let factory = Arc::new(MockModemFactory::with_ports(ports));
        let records = Arc::new(FailingRecords::default());
        let broadcaster = Arc::new(FailingBroadcaster::default());
        let registry = PortRegistry::new(
            test_config(&dir),
            factory.clone(),
            records.clone(),
            broadcaster.clone(),
        );
        Self {
            registry,
            factory,
            records,
            broadcaster,
            dir,
        }
    }

    pub fn modem(&self, port: &str) -> MockModem {
        self.factory.modem(port).unwrap()
    }

    pub fn saves(&self) -> usize {
        self.records.saves.load(Ordering::SeqCst)
    }

    pub fn publishes(&self) -> usize {
        self.broadcaster.publishes.load(Ordering::SeqCst)
    }

    pub fn wait_for_state(&self, port: &str, state: CallState) {
        assert!(
            wait_until(Duration::from_secs(5), || {
                self.registry.status(port).map(|s| s.call_state) == Some(state)
            }),
            "{port} never reached {state}"
        );
    }

    pub fn wait_for_no_session(&self, port: &str) {
        assert!(
            wait_until(Duration::from_secs(5), || self.registry.status(port).is_none()),
            "{port} still has a session"
        );
    }
}

pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}
