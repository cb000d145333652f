//! Port traits (interfaces)
//!
//! These traits define the boundaries between the call engine and external I/O.
//! Adapters implement these traits to connect to real hardware and storage.

pub mod broadcast;
pub mod repository;
pub mod serial;

pub use broadcast::*;
pub use repository::*;
pub use serial::*;
