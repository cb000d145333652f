//! Domain error types

use thiserror::Error;

/// Errors that can occur while driving a GSM modem
#[derive(Error, Debug)]
pub enum ModemError {
    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("AT command error: {0}")]
    At(String),

    #[error("Cannot open port: {0}")]
    ChannelOpen(String),

    #[error("SMS error: {0}")]
    Sms(String),

    #[error("Recording error: {0}")]
    Recording(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Status broadcast error: {0}")]
    Broadcast(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for modem operations
pub type ModemResult<T> = Result<T, ModemError>;
