//! Frame Construction
//!
//! Every broadcast frame has the same line-oriented layout:
//!
//! ```text
//! [<sender-ip>]<padding><payload>\n
//! ```
//!
//! The address field is a fixed 18 bytes (brackets plus a dotted-decimal
//! IPv4 address, space-padded), so payloads always start at the same
//! column. The sender's trailing newline is stripped before framing and
//! exactly one `\n` terminates the frame. Payload bytes are not escaped;
//! there is no length prefix and no version negotiation.

use bytes::{BufMut, Bytes, BytesMut};

/// Length of the longest dotted-decimal IPv4 address ("255.255.255.255")
pub const IP_ADDR_SIZE: usize = 15;

/// Fixed width of the `[<ip>]` field including its trailing padding
pub const ADDR_FIELD_WIDTH: usize = IP_ADDR_SIZE + 3;

/// Default upper bound on payload bytes per frame
pub const DEFAULT_MAX_PAYLOAD: usize = 1024;

/// Synthetic payload announcing a new peer
pub const CONNECTED: &str = "connected";

/// Synthetic payload announcing a departed peer
pub const DISCONNECTED: &str = "disconnected";

/// Build an outbound frame for a payload sent by `ip`.
///
/// The payload is stripped of one trailing line ending and truncated to
/// `max_payload` bytes. Truncation is deterministic: recipients see the
/// first `max_payload` bytes, never a corrupted or dropped frame.
pub fn format_frame(ip: &str, payload: &[u8], max_payload: usize) -> Bytes {
    let payload = strip_line_ending(payload);
    let payload = &payload[..payload.len().min(max_payload)];

    let mut frame = BytesMut::with_capacity(ADDR_FIELD_WIDTH + payload.len() + 1);
    frame.put_u8(b'[');
    let ip = ip.as_bytes();
    frame.put_slice(&ip[..ip.len().min(IP_ADDR_SIZE)]);
    frame.put_u8(b']');
    while frame.len() < ADDR_FIELD_WIDTH {
        frame.put_u8(b' ');
    }
    frame.put_slice(payload);
    frame.put_u8(b'\n');

    frame.freeze()
}

/// Strip one trailing `\n` or `\r\n` from an inbound payload
fn strip_line_ending(payload: &[u8]) -> &[u8] {
    let payload = match payload.last() {
        Some(b'\n') => &payload[..payload.len() - 1],
        _ => payload,
    };
    match payload.last() {
        Some(b'\r') => &payload[..payload.len() - 1],
        _ => payload,
    }
}
