//! Pure decoding: modem text → typed values.
//!
//! No I/O, no side effects. Inputs are the best-effort ASCII view of what
//! came off the wire, so every parser tolerates surrounding noise (echoes,
//! blank lines, unrelated unsolicited codes) and only looks for its prefix.

use crate::domain::{CallState, SignalStrength};

/// Best-effort ASCII view of raw bytes.
///
/// Every byte maps to exactly one char; non-ASCII bytes become U+FFFD.
/// Good enough for token scanning, never for binary payloads.
pub fn ascii_view(raw: &[u8]) -> String {
    raw.iter()
        .map(|&b| {
            if b.is_ascii() {
                b as char
            } else {
                char::REPLACEMENT_CHARACTER
            }
        })
        .collect()
}

/// True once a synchronous reply carries its final result code.
pub fn reply_complete(response: &str) -> bool {
    response.contains("OK") || response.contains("ERROR")
}

/// Position of `needle` inside `haystack`, byte-wise.
pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

// ---------------------------------------------------------------------------
// Call list (AT+CLCC)
// ---------------------------------------------------------------------------

/// One `+CLCC: <idx>,<dir>,<stat>,<mode>,<mpty>[,"<number>",<type>]` line
#[derive(Debug, Clone, PartialEq)]
pub struct ClccEntry {
    pub index: u8,
    /// Mobile-originated call
    pub outgoing: bool,
    pub stat: u8,
    pub number: Option<String>,
}

impl ClccEntry {
    pub fn call_state(&self) -> CallState {
        match self.stat {
            0 | 1 => CallState::Active,
            2 => CallState::Dialing,
            3 => CallState::Ringing,
            4 | 5 => CallState::Incoming,
            _ => CallState::Dialing,
        }
    }
}

/// Outcome of one call-list query
#[derive(Debug, Clone, PartialEq)]
pub enum CallList {
    /// Nothing came back before the timeout
    NoReply,
    /// The modem answered but listed no call
    Idle,
    Call(ClccEntry),
}

pub fn decode_call_list(response: &str) -> CallList {
    if response.trim().is_empty() {
        return CallList::NoReply;
    }
    if !response.contains("+CLCC:") {
        return if reply_complete(response) {
            CallList::Idle
        } else {
            CallList::NoReply
        };
    }
    match response.lines().find_map(parse_clcc_line) {
        Some(entry) => CallList::Call(entry),
        None => {
            log::warn!("Unparseable call list reply: '{}'", response.trim());
            CallList::NoReply
        }
    }
}

fn parse_clcc_line(line: &str) -> Option<ClccEntry> {
    let start = line.find("+CLCC:")? + "+CLCC:".len();
    let parts: Vec<&str> = line[start..].trim().split(',').map(str::trim).collect();
    if parts.len() < 3 {
        return None;
    }
    let index = parts[0].parse().ok()?;
    let outgoing = parts[1] == "0";
    let stat = parts[2].parse().ok()?;
    let number = parts
        .get(5)
        .map(|n| n.trim_matches('"').to_string())
        .filter(|n| !n.is_empty());
    Some(ClccEntry {
        index,
        outgoing,
        stat,
        number,
    })
}

// ---------------------------------------------------------------------------
// Unsolicited notifications
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    NoCarrier,
    Busy,
    NoAnswer,
}

/// Call progress reported by the modem without being asked
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Dialing,
    Alerting,
    Connected,
    Incoming { caller: Option<String> },
    Disconnected(Disconnect),
}

impl Notification {
    /// The call state this notification moves a session to, if any
    pub fn call_state(&self) -> CallState {
        match self {
            Notification::Dialing => CallState::Dialing,
            Notification::Alerting => CallState::Ringing,
            Notification::Connected => CallState::Active,
            Notification::Incoming { .. } => CallState::Incoming,
            Notification::Disconnected(_) => CallState::Ended,
        }
    }
}

/// Scan one inbound chunk for the strongest call-progress marker.
///
/// Terminal markers win over everything else in the same chunk.
pub fn scan_notification(text: &str) -> Option<Notification> {
    if text.contains("NO CARRIER") {
        Some(Notification::Disconnected(Disconnect::NoCarrier))
    } else if text.contains("BUSY") {
        Some(Notification::Disconnected(Disconnect::Busy))
    } else if text.contains("NO ANSWER") {
        Some(Notification::Disconnected(Disconnect::NoAnswer))
    } else if text.contains("^CONN") || text.contains("CONNECT") {
        Some(Notification::Connected)
    } else if text.contains("^CONF") || text.contains("ALERTING") {
        Some(Notification::Alerting)
    } else if text.contains("^ORIG") || text.contains("DIALING") {
        Some(Notification::Dialing)
    } else if text.contains("RING") || text.contains("+CLIP:") {
        Some(Notification::Incoming {
            caller: parse_clip(text),
        })
    } else {
        None
    }
}

/// Caller number from `+CLIP: "<number>",<type>,...`
pub fn parse_clip(text: &str) -> Option<String> {
    let start = text.find("+CLIP:")? + "+CLIP:".len();
    let rest = &text[start..];
    let open = rest.find('"')?;
    let close = rest[open + 1..].find('"')? + open + 1;
    let number = &rest[open + 1..close];
    (!number.is_empty()).then(|| number.to_string())
}

// ---------------------------------------------------------------------------
// On-modem file listing (AT+QFLST)
// ---------------------------------------------------------------------------

/// Last listed file that looks like a call recording.
///
/// The modem lists files oldest first, so the last match is the newest.
pub fn latest_recording_file(listing: &str) -> Option<String> {
    listing
        .lines()
        .filter(|line| line.contains("+QFLST:"))
        .filter_map(first_quoted)
        .filter(|name| {
            let lower = name.to_lowercase();
            lower.ends_with(".amr") || lower.ends_with(".wav") || lower.starts_with("record")
        })
        .last()
        .map(str::to_string)
}

fn first_quoted(line: &str) -> Option<&str> {
    let open = line.find('"')?;
    let close = line[open + 1..].find('"')? + open + 1;
    Some(&line[open + 1..close])
}

// ---------------------------------------------------------------------------
// SIM identity replies
// ---------------------------------------------------------------------------

/// Own number from a `+CNUM:` or `+CPBR:` reply, normalised to national form.
pub fn parse_own_number(response: &str) -> Option<String> {
    if !response.contains("+CNUM:") && !response.contains("+CPBR:") {
        return None;
    }
    response
        .lines()
        .filter(|line| line.contains("+CNUM:") || line.contains("+CPBR:"))
        .flat_map(|line| line.split('"'))
        .map(str::trim)
        .find(|part| looks_like_phone_number(part))
        .map(normalize_own_number)
}

/// `[+0-9]` followed by at least eight digits
fn looks_like_phone_number(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '+' || c.is_ascii_digit() => {}
        _ => return false,
    }
    let rest: Vec<char> = chars.collect();
    rest.len() >= 8 && rest.iter().all(char::is_ascii_digit)
}

fn normalize_own_number(number: &str) -> String {
    number
        .replace("+84", "0")
        .replace("+81", "0")
        .replace('+', "")
}

/// Operator name from `+COPS: 0,0,"VIETTEL",7`
pub fn parse_operator(response: &str) -> Option<String> {
    if !response.contains("+COPS:") {
        return None;
    }
    response
        .split('"')
        .nth(1)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// IMEI from an `AT+CGSN` reply: a line of exactly fifteen digits
pub fn parse_imei(response: &str) -> Option<String> {
    response
        .lines()
        .map(str::trim)
        .find(|line| line.len() == 15 && line.chars().all(|c| c.is_ascii_digit()))
        .map(str::to_string)
}

/// Signal strength from `+CSQ: <rssi>,<ber>`. RSSI 99 means "not known".
pub fn parse_signal(response: &str) -> Option<SignalStrength> {
    let start = response.find("+CSQ:")? + "+CSQ:".len();
    let rssi: u8 = response[start..]
        .trim()
        .split(',')
        .next()?
        .trim()
        .parse()
        .ok()?;
    (rssi != 99).then(|| SignalStrength::from_rssi(rssi))
}
