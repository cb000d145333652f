//! Core domain types
//!
//! Pure types with no I/O dependencies. These represent calls, recordings,
//! persisted call records and engine configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;
