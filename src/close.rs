//! Close codes and close frame payloads (RFC 6455 Section 7).
//!
//! A Close frame payload carries an optional 2-byte big-endian status code
//! followed by an optional UTF-8 reason (which this layer does not validate).
//! The registry maps codes 1000-1015 to the human-readable descriptions shown
//! to operators; slots unassigned by the RFC stay `"???"`.

use bytes::Bytes;

/// Status code for a normal closure.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Status code reported when a Close frame carries no payload.
pub const NO_STATUS_RECEIVED: u16 = 1005;

/// Descriptions for codes 1000..=1015, indexed by `code - 1000`.
const DESCRIPTIONS: [&str; 16] = [
    "Normal Closure",
    "Going Away",
    "Protocol error",
    "Unsupported Data",
    "???",
    "No Status Rcvd",
    "Abnormal Closure",
    "Invalid frame payload data",
    "Policy Violation",
    "Message Too Big",
    "Mandatory Ext",
    "Internal Server Error",
    "???",
    "???",
    "???",
    "TLS handshake",
];

/// Describe a close status code.
///
/// Codes outside 1000..=1015 and unassigned slots inside the range map to
/// `"???"`. Constant-time table lookup.
#[must_use]
pub fn describe(code: u16) -> &'static str {
    code.checked_sub(1000)
        .and_then(|index| DESCRIPTIONS.get(index as usize))
        .copied()
        .unwrap_or("???")
}

/// Why the peer ended the connection, as read from a Close frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    /// Status code from the first two payload bytes, or
    /// [`NO_STATUS_RECEIVED`] when the payload is shorter than that.
    pub code: u16,
    /// Registry description for `code`.
    pub description: &'static str,
}

impl CloseReason {
    /// Parse a Close frame payload.
    ///
    /// Trailing reason text after the status code is ignored: it is optional,
    /// and this layer does not validate UTF-8.
    #[must_use]
    pub fn parse(payload: &[u8]) -> Self {
        let code = match payload {
            [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
            _ => NO_STATUS_RECEIVED,
        };
        Self {
            code,
            description: describe(code),
        }
    }

    /// Encode a status code as a Close frame payload.
    #[must_use]
    pub fn encode(code: u16) -> Bytes {
        Bytes::copy_from_slice(&code.to_be_bytes())
    }
}
