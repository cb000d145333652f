//! AT command layer for GSM modems.
//!
//! Two pure halves, both testable without a serial port:
//! - `encode`: translate AtCommand → wire string
//! - `decode`: translate reply / notification text → typed values
//!
//! The wire strings are matched literally by modem firmware, so they live
//! in exactly one place.

pub mod decode;
pub mod encode;

pub use decode::*;
pub use encode::{encode, validate_number};

/// Appended to every command line by the serial channel
pub const LINE_TERMINATOR: &str = "\r";

/// Ctrl+Z, terminates an SMS body
pub const CTRL_Z: char = '\x1A';

/// Escape, aborts a pending SMS body
pub const ESC: char = '\x1B';

/// Signature at the start of the audio container the modem streams back
pub const AUDIO_SIGNATURE: &str = "RIFF";

/// Reply prefix the modem prints once a file download has been streamed
pub const DOWNLOAD_END_TOKEN: &str = "+QFDWL:";

/// Commands understood by the modem.
#[derive(Debug, PartialEq, Clone)]
pub enum AtCommand {
    /// Voice call to a number (`ATD<number>;`)
    Dial(String),
    Answer,
    Hangup,
    // SMS (text mode)
    SmsTextMode,
    SmsRecipient(String),
    /// Message body, sent with the Ctrl+Z terminator
    SmsBody(String),
    /// Current call list
    ListCalls,
    /// On-modem file listing for a glob pattern
    ListFiles(String),
    DownloadFile(String),
    // SIM / network identity
    OwnNumber,
    FirstPhonebookEntry,
    Operator,
    Imei,
    SignalQuality,
}
