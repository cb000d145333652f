//! GSM modem call engine
//!
//! Places and answers voice calls, sends SMS and pulls call recordings off
//! GSM modems attached to serial lines, tracking every call's lifecycle.
//!
//! ## Architecture (Hexagonal / Ports & Adapters)
//!
//! - `domain/` - Pure domain types, no I/O dependencies
//! - `ports/` - Trait definitions (interfaces) for external dependencies
//! - `at/` - AT command protocol (pure encode / decode, no I/O)
//! - `adapters/` - Implementations of ports (serialport, mock modem, record stores)
//! - `channel` - one serial line: writer, reader thread, request/response
//! - `capture` - reassembly of audio streamed back in-band
//! - `call/` - per-port call session state machine
//! - `scheduler` - worker pool and timers owned by the registry
//! - `registry` - the orchestrator tying the above together
//! - `scan` - port discovery and SIM identity probe

// Core domain (pure, no I/O)
pub mod at;
pub mod call;
pub mod domain;
pub mod ports;

// Adapters (external I/O)
pub mod adapters;

// Engine
pub mod capture;
pub mod channel;
pub mod registry;
pub mod scan;
pub mod scheduler;
mod sync;

pub use registry::PortRegistry;
pub use scan::PortScanner;
