//! Pure encoding: AtCommand → AT wire string.
//!
//! No I/O, no side effects. The line terminator is not part of the result;
//! the serial channel appends it when writing.

use crate::domain::{ModemError, ModemResult};

use super::{AtCommand, CTRL_Z};

/// Encode an AtCommand into the exact string the modem expects.
pub fn encode(cmd: &AtCommand) -> String {
    use AtCommand::*;
    match cmd {
        Dial(number) => format!("ATD{number};"),
        Answer => "ATA".into(),
        Hangup => "ATH".into(),
        SmsTextMode => "AT+CMGF=1".into(),
        SmsRecipient(number) => format!("AT+CMGS=\"{number}\""),
        SmsBody(body) => format!("{body}{CTRL_Z}"),
        ListCalls => "AT+CLCC".into(),
        ListFiles(pattern) => format!("AT+QFLST=\"{pattern}\""),
        DownloadFile(name) => format!("AT+QFDWL=\"{name}\""),
        OwnNumber => "AT+CNUM".into(),
        FirstPhonebookEntry => "AT+CPBR=1".into(),
        Operator => "AT+COPS?".into(),
        Imei => "AT+CGSN".into(),
        SignalQuality => "AT+CSQ".into(),
    }
}

/// Reject numbers that would break out of a dial or CMGS command.
///
/// Accepts digits and the dial-string characters `+`, `*`, `#`.
pub fn validate_number(number: &str) -> ModemResult<&str> {
    let trimmed = number.trim();
    if trimmed.is_empty() {
        return Err(ModemError::At("Phone number cannot be empty".to_string()));
    }
    if !trimmed
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '*' | '#'))
    {
        return Err(ModemError::At(format!("Invalid phone number '{trimmed}'")));
    }
    Ok(trimmed)
}
