//! SerialChannel: owns one modem port and drives its I/O.
//!
//! One background reader thread per open port turns every successful read
//! into an inbound chunk. Each chunk goes first to the registered observer
//! (passive call-progress detection, audio capture) and then, while a
//! synchronous exchange is in flight, to that exchange's tap.
//!
//! Writes come from any thread and are serialized by the writer mutex.
//! Pure translation lives in `at::encode` / `at::decode`; this type only
//! handles bytes and timing.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};

use crate::at::{ascii_view, reply_complete, LINE_TERMINATOR};
use crate::ports::{SerialConnection, SerialFactory};
use crate::sync::lock;

/// Size of the reusable read buffer
const READ_CHUNK_SIZE: usize = 8192;

/// Callback for every inbound chunk: exact raw bytes plus their ASCII view
pub type InboundObserver = Arc<dyn Fn(&[u8], &str) + Send + Sync>;

/// Owns a serial connection to one GSM modem.
pub struct SerialChannel {
    port: String,
    baud_rate: u32,
    factory: Arc<dyn SerialFactory>,
    writer: Mutex<Option<Box<dyn SerialConnection>>>,
    observer: Arc<Mutex<Option<InboundObserver>>>,
    tap: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
    /// Serializes send-and-await exchanges
    exchange: Mutex<()>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    reader_id: Mutex<Option<ThreadId>>,
}

impl SerialChannel {
    pub fn new(port: &str, baud_rate: u32, factory: Arc<dyn SerialFactory>) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            factory,
            writer: Mutex::new(None),
            observer: Arc::new(Mutex::new(None)),
            tap: Arc::new(Mutex::new(None)),
            exchange: Mutex::new(()),
            running: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
            reader_id: Mutex::new(None),
        }
    }

    /// Open the port and start the reader thread.
    ///
    /// Returns `true` if the port is open afterwards (including when it
    /// already was). Failures are logged, never raised.
    pub fn open(&self) -> bool {
        let mut writer = lock(&self.writer);
        if writer.is_some() && self.running.load(Ordering::SeqCst) {
            return true;
        }

        let mut connection = match self.factory.open(&self.port, self.baud_rate) {
            Ok(connection) => connection,
            Err(e) => {
                log::error!("[{}] open failed: {e}", self.port);
                return false;
            }
        };
        let reader_half = match connection.try_clone() {
            Ok(reader_half) => reader_half,
            Err(e) => {
                log::error!("[{}] cannot clone port for reading: {e}", self.port);
                let _ = connection.close();
                return false;
            }
        };

        self.running.store(true, Ordering::SeqCst);
        let reader = ReaderLoop {
            port: self.port.clone(),
            serial: reader_half,
            running: self.running.clone(),
            observer: self.observer.clone(),
            tap: self.tap.clone(),
        };
        let spawned = thread::Builder::new()
            .name(format!("serial-rx-{}", self.port))
            .spawn(move || reader.run());
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("[{}] cannot start reader thread: {e}", self.port);
                self.running.store(false, Ordering::SeqCst);
                let _ = connection.close();
                return false;
            }
        };

        *lock(&self.reader_id) = Some(handle.thread().id());
        *lock(&self.reader) = Some(handle);
        *writer = Some(connection);
        log::info!("[{}] opened at {} baud", self.port, self.baud_rate);
        true
    }

    pub fn is_open(&self) -> bool {
        self.running.load(Ordering::SeqCst) && lock(&self.writer).is_some()
    }

    /// Write `command` followed by the line terminator.
    ///
    /// `true` only if every byte was accepted by the OS.
    pub fn send(&self, command: &str) -> bool {
        let mut writer = lock(&self.writer);
        let Some(connection) = writer.as_mut() else {
            log::warn!("[{}] send on closed port: {command}", self.port);
            return false;
        };

        let wire = format!("{command}{LINE_TERMINATOR}");
        log::debug!("[{}] AT TX: {}", self.port, command.escape_debug());
        match connection.write(wire.as_bytes()) {
            Ok(n) if n == wire.len() => true,
            Ok(n) => {
                log::warn!("[{}] short write: {n} of {} bytes", self.port, wire.len());
                false
            }
            Err(e) => {
                log::warn!("[{}] write failed: {e}", self.port);
                false
            }
        }
    }

    /// Install the inbound observer, replacing any previous one.
    pub fn register_observer(&self, observer: InboundObserver) {
        *lock(&self.observer) = Some(observer);
    }

    /// Send a command and collect inbound text until a final result code
    /// (`OK` / `ERROR`) arrives or `timeout` elapses.
    ///
    /// Returns whatever was accumulated, possibly empty. Must not be called
    /// from the reader thread (that thread is the one delivering the reply).
    pub fn send_and_await(&self, command: &str, timeout: Duration) -> String {
        self.send_and_await_if(command, timeout, || true)
            .unwrap_or_default()
    }

    /// Like `send_and_await`, but `proceed` is checked once the exchange
    /// guard is held; `None` means it declined and nothing was written.
    pub fn send_and_await_if(
        &self,
        command: &str,
        timeout: Duration,
        proceed: impl FnOnce() -> bool,
    ) -> Option<String> {
        if self.on_reader_thread() {
            log::warn!("[{}] send_and_await called from reader thread: {command}", self.port);
            return Some(String::new());
        }

        let _exchange = lock(&self.exchange);
        if !proceed() {
            log::debug!("[{}] exchange skipped: {command}", self.port);
            return None;
        }
        let (tx, rx) = crossbeam_channel::unbounded();
        *lock(&self.tap) = Some(tx);

        let response = if self.send(command) {
            collect_reply(&rx, Instant::now() + timeout)
        } else {
            String::new()
        };

        *lock(&self.tap) = None;
        log::trace!("[{}] AT RX: {}", self.port, response.escape_debug());
        Some(response)
    }

    /// Run `f` while no `send_and_await` exchange is in flight, so no reply
    /// to another exchange can arrive in between.
    pub fn exclusive<R>(&self, f: impl FnOnce() -> R) -> R {
        let _exchange = lock(&self.exchange);
        f()
    }

    /// Stop the reader and release the port. Idempotent.
    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(mut connection) = lock(&self.writer).take() {
            if let Err(e) = connection.close() {
                log::warn!("[{}] close failed: {e}", self.port);
            }
            log::info!("[{}] closed", self.port);
        }

        let handle = lock(&self.reader).take();
        if let Some(handle) = handle {
            // A close triggered from inside the observer cannot join itself;
            // the loop sees `running == false` and exits on its own.
            if !self.on_reader_thread() && handle.join().is_err() {
                log::error!("[{}] reader thread panicked", self.port);
            }
        }
        *lock(&self.tap) = None;
    }

    fn on_reader_thread(&self) -> bool {
        *lock(&self.reader_id) == Some(thread::current().id())
    }
}

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn collect_reply(rx: &Receiver<Vec<u8>>, deadline: Instant) -> String {
    let mut response = String::new();
    while let Ok(chunk) = rx.recv_deadline(deadline) {
        response.push_str(&ascii_view(&chunk));
        if reply_complete(&response) {
            break;
        }
    }
    response
}

/// State moved onto the reader thread
struct ReaderLoop {
    port: String,
    serial: Box<dyn SerialConnection>,
    running: Arc<AtomicBool>,
    observer: Arc<Mutex<Option<InboundObserver>>>,
    tap: Arc<Mutex<Option<Sender<Vec<u8>>>>>,
}

impl ReaderLoop {
    fn run(mut self) {
        let mut buffer = vec![0u8; READ_CHUNK_SIZE];

        while self.running.load(Ordering::SeqCst) {
            let n = match self.serial.read(&mut buffer) {
                Ok(0) => continue,
                Ok(n) => n,
                Err(e) => {
                    log::warn!("[{}] read failed, stopping reader: {e}", self.port);
                    self.running.store(false, Ordering::SeqCst);
                    break;
                }
            };

            let raw = &buffer[..n];
            let text = ascii_view(raw);
            log::trace!("[{}] RX {n} bytes", self.port);

            // Observer first: a download reset must see the chunk before any
            // waiting exchange does.
            let observer = lock(&self.observer).clone();
            if let Some(observer) = observer {
                observer(raw, &text);
            }

            if let Some(tap) = lock(&self.tap).as_ref() {
                let _ = tap.send(raw.to_vec());
            }
        }

        let _ = self.serial.close();
        log::debug!("[{}] reader stopped", self.port);
    }
}
