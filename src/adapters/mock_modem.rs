//! Mock GSM modem for development and testing without hardware.
//!
//! Activate by setting MOCK_MODEM=1 in the environment:
//!
//!   MOCK_MODEM=1 RUST_LOG=modemcall_lib=debug cargo run -- call COM5 0987654321
//!
//! Every command written to a mock port is recorded and answered the way a
//! Quectel-style modem would answer it. Tests drive call progress by
//! pushing unsolicited text with `push_inbound` and by changing what
//! `AT+CLCC` reports.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use crate::at::CTRL_Z;
use crate::domain::{ModemError, ModemResult, SerialPortInfo};
use crate::ports::{SerialConnection, SerialFactory};
use crate::sync::lock;

/// How long a mock read waits for inbound data before reporting a timeout
const READ_TIMEOUT_MS: u64 = 20;

/// Size of each payload chunk streamed back by `AT+QFDWL`
const DOWNLOAD_CHUNK: usize = 1024;

/// Hands out connections to a fixed set of mock modems.
#[derive(Default)]
pub struct MockModemFactory {
    modems: Mutex<HashMap<String, MockModem>>,
}

impl MockModemFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ports(ports: &[&str]) -> Self {
        let factory = Self::new();
        for port in ports {
            factory.add_port(port);
        }
        factory
    }

    /// Add (or fetch) the modem behind `port`
    pub fn add_port(&self, port: &str) -> MockModem {
        lock(&self.modems)
            .entry(port.to_string())
            .or_insert_with(|| MockModem::new(port))
            .clone()
    }

    pub fn modem(&self, port: &str) -> Option<MockModem> {
        lock(&self.modems).get(port).cloned()
    }
}

impl SerialFactory for MockModemFactory {
    fn list_ports(&self) -> ModemResult<Vec<SerialPortInfo>> {
        let mut ports: Vec<SerialPortInfo> = lock(&self.modems)
            .keys()
            .map(|name| SerialPortInfo {
                name: name.clone(),
                port_type: "Mock".to_string(),
            })
            .collect();
        ports.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(ports)
    }

    fn open(&self, port: &str, baud_rate: u32) -> ModemResult<Box<dyn SerialConnection>> {
        let modem = self
            .modem(port)
            .ok_or_else(|| ModemError::Serial(format!("Failed to open {port}: no such port")))?;
        if modem.state.fail_open.load(Ordering::SeqCst) {
            return Err(ModemError::Serial(format!("Failed to open {port}: access denied")));
        }
        log::info!("[MOCK MODEM] {port} opened at {baud_rate} baud");
        Ok(Box::new(MockConnection::new(modem)))
    }
}

struct ModemState {
    port: String,
    written: Mutex<Vec<String>>,
    call_list: Mutex<Option<String>>,
    /// Files on the modem's storage, in listing order
    files: Mutex<Vec<(String, Vec<u8>)>>,
    own_number: Mutex<Option<String>>,
    silent: AtomicBool,
    stall_downloads: AtomicBool,
    fail_open: AtomicBool,
    write_delay: Mutex<Duration>,
    inbound_tx: Sender<Vec<u8>>,
    inbound_rx: Receiver<Vec<u8>>,
}

/// Handle onto one mock modem. Clones share the same modem.
#[derive(Clone)]
pub struct MockModem {
    state: Arc<ModemState>,
}

impl MockModem {
    fn new(port: &str) -> Self {
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        Self {
            state: Arc::new(ModemState {
                port: port.to_string(),
                written: Mutex::new(Vec::new()),
                call_list: Mutex::new(None),
                files: Mutex::new(Vec::new()),
                own_number: Mutex::new(Some("+84900000001".to_string())),
                silent: AtomicBool::new(false),
                stall_downloads: AtomicBool::new(false),
                fail_open: AtomicBool::new(false),
                write_delay: Mutex::new(Duration::ZERO),
                inbound_tx,
                inbound_rx,
            }),
        }
    }

    /// Commands written so far, without the line terminator
    pub fn written(&self) -> Vec<String> {
        lock(&self.state.written).clone()
    }

    /// Unsolicited data from the modem, delivered as one read
    pub fn push_inbound(&self, data: impl AsRef<[u8]>) {
        let _ = self.state.inbound_tx.send(data.as_ref().to_vec());
    }

    /// What `AT+CLCC` lists: one `+CLCC:` line, or `None` for no call
    pub fn set_call_list(&self, line: Option<&str>) {
        *lock(&self.state.call_list) = line.map(str::to_string);
    }

    pub fn add_file(&self, name: &str, content: Vec<u8>) {
        lock(&self.state.files).push((name.to_string(), content));
    }

    pub fn set_own_number(&self, number: Option<&str>) {
        *lock(&self.state.own_number) = number.map(str::to_string);
    }

    /// Stop answering commands (writes still succeed)
    pub fn set_silent(&self, silent: bool) {
        self.state.silent.store(silent, Ordering::SeqCst);
    }

    /// Stream file contents but never send the end-of-download reply
    pub fn set_stall_downloads(&self, stall: bool) {
        self.state.stall_downloads.store(stall, Ordering::SeqCst);
    }

    pub fn set_fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Simulated line latency applied to every write
    pub fn set_write_delay(&self, delay: Duration) {
        *lock(&self.state.write_delay) = delay;
    }

    fn respond(&self, command: &str) {
        let state = &self.state;
        if state.silent.load(Ordering::SeqCst) {
            return;
        }

        if command.ends_with(CTRL_Z) {
            self.push_inbound("\r\n+CMGS: 12\r\n\r\nOK\r\n");
        } else if command == "AT+CLCC" {
            let listing = lock(&state.call_list)
                .as_ref()
                .map(|line| format!("\r\n{line}\r\n"))
                .unwrap_or_default();
            self.push_inbound(format!("{listing}\r\nOK\r\n"));
        } else if command.starts_with("AT+QFLST") {
            let listing: String = lock(&state.files)
                .iter()
                .map(|(name, content)| format!("+QFLST: \"{name}\",{}\r\n", content.len()))
                .collect();
            self.push_inbound(format!("\r\n{listing}\r\nOK\r\n"));
        } else if let Some(rest) = command.strip_prefix("AT+QFDWL=") {
            self.stream_file(rest.trim_matches('"'));
        } else if command.starts_with("AT+CMGS=") {
            self.push_inbound("\r\n> ");
        } else if command == "AT+CNUM" {
            let line = lock(&state.own_number)
                .as_ref()
                .map(|n| format!("\r\n+CNUM: \"\",\"{n}\",145\r\n"))
                .unwrap_or_default();
            self.push_inbound(format!("{line}\r\nOK\r\n"));
        } else if command == "AT+COPS?" {
            self.push_inbound("\r\n+COPS: 0,0,\"MOCKTEL\",7\r\n\r\nOK\r\n");
        } else if command == "AT+CGSN" {
            self.push_inbound("\r\n860000000000001\r\n\r\nOK\r\n");
        } else if command == "AT+CSQ" {
            self.push_inbound("\r\n+CSQ: 23,99\r\n\r\nOK\r\n");
        } else if command == "ATH" {
            self.set_call_list(None);
            self.push_inbound("\r\nOK\r\n");
        } else {
            self.push_inbound("\r\nOK\r\n");
        }
    }

    fn stream_file(&self, name: &str) {
        let content = lock(&self.state.files)
            .iter()
            .find(|(file, _)| file == name)
            .map(|(_, content)| content.clone());
        let Some(content) = content else {
            self.push_inbound("\r\n+CME ERROR: 405\r\n");
            return;
        };
        for chunk in content.chunks(DOWNLOAD_CHUNK) {
            self.push_inbound(chunk);
        }
        if self.state.stall_downloads.load(Ordering::SeqCst) {
            return;
        }
        let checksum = content.iter().fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)));
        self.push_inbound(format!(
            "\r\n+QFDWL: {},{checksum:04x}\r\n\r\nOK\r\n",
            content.len()
        ));
    }
}

/// One open handle onto a mock modem
struct MockConnection {
    modem: MockModem,
    pending: Vec<u8>,
    connected: bool,
}

impl MockConnection {
    fn new(modem: MockModem) -> Self {
        Self {
            modem,
            pending: Vec::new(),
            connected: true,
        }
    }
}

impl SerialConnection for MockConnection {
    fn write(&mut self, data: &[u8]) -> ModemResult<usize> {
        if !self.connected {
            return Err(ModemError::Serial("Port closed".to_string()));
        }
        let delay = *lock(&self.modem.state.write_delay);
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let text = String::from_utf8_lossy(data);
        let command = text.trim_end_matches('\r').to_string();
        log::info!("[MOCK MODEM] {} ← {}", self.modem.state.port, command.escape_debug());
        lock(&self.modem.state.written).push(command.clone());
        self.modem.respond(&command);
        Ok(data.len())
    }

    fn read(&mut self, buffer: &mut [u8]) -> ModemResult<usize> {
        if self.pending.is_empty() {
            match self
                .modem
                .state
                .inbound_rx
                .recv_timeout(Duration::from_millis(READ_TIMEOUT_MS))
            {
                Ok(chunk) => self.pending = chunk,
                Err(_) => return Ok(0),
            }
        }
        let n = self.pending.len().min(buffer.len());
        buffer[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }

    fn try_clone(&self) -> ModemResult<Box<dyn SerialConnection>> {
        Ok(Box::new(MockConnection::new(self.modem.clone())))
    }

    fn close(&mut self) -> ModemResult<()> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
