//! Per-port call lifecycle

pub mod session;

pub use session::{CallSession, Transition};
