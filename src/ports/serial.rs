//! Serial port traits
//!
//! Split into two traits:
//! - `SerialFactory`: listing and opening ports
//! - `SerialConnection`: instance methods for reading/writing data
//!
//! The factory takes `&self` so the registry can hold either the real
//! `serialport` adapter or the mock modem behind the same `Arc<dyn _>`.

use crate::domain::{ModemResult, SerialPortInfo};

/// Factory for creating serial connections.
pub trait SerialFactory: Send + Sync {
    /// List available serial ports on the system
    fn list_ports(&self) -> ModemResult<Vec<SerialPortInfo>>;

    /// Open a port at the given baud rate (8 data bits, 1 stop bit, no parity)
    fn open(&self, port: &str, baud_rate: u32) -> ModemResult<Box<dyn SerialConnection>>;
}

/// Trait for an open serial port connection.
/// Only requires `Send` (not `Sync`); the writer half lives behind a Mutex
/// and the reader half is owned by exactly one thread.
pub trait SerialConnection: Send {
    /// Write bytes to the port
    fn write(&mut self, data: &[u8]) -> ModemResult<usize>;

    /// Read bytes from the port. Returns `Ok(0)` when the read timed out.
    fn read(&mut self, buffer: &mut [u8]) -> ModemResult<usize>;

    /// A second handle onto the same OS port, used by the reader thread
    fn try_clone(&self) -> ModemResult<Box<dyn SerialConnection>>;

    /// Close the connection
    fn close(&mut self) -> ModemResult<()>;

    /// Check if the port is still connected
    fn is_connected(&self) -> bool;
}
