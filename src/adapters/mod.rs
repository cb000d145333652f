//! Adapters: implementations of the port traits
//!
//! - `serial_port`: real hardware through the `serialport` crate
//! - `mock_modem`: scripted in-memory modem (MOCK_MODEM=1, tests)
//! - `record_store`: call record persistence
//! - `broadcast`: status update sinks

pub mod broadcast;
pub mod mock_modem;
pub mod record_store;
pub mod serial_port;

pub use broadcast::{ChannelBroadcaster, LogBroadcaster};
pub use mock_modem::{MockModem, MockModemFactory};
pub use record_store::{InMemoryCallRecords, JsonlCallRecords};
pub use serial_port::SerialPortFactory;
