//! Realtime wire format.
//!
//! Two endpoints share the server and are routed by path:
//! - memo events: JSON text frames `{"type": ..., "payload": ...}` pushed to clients
//! - ping: plain-text liveness channel used for connectivity testing

use crate::events::MemoEvent;

/// Path of the memo event channel.
pub const MEMO_EVENTS_PATH: &str = "/api/memos/ws";

/// Path of the connectivity-test channel.
pub const PING_PATH: &str = "/api/ping/ws";

/// First frame sent on the ping channel.
pub const PING_WELCOME: &str = "Welcome to Ping WebSocket!";
pub const PING: &str = "ping";
pub const PONG: &str = "pong";

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (page unload, server shutdown).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Closed without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Protocol errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed event envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn encode_event(event: &MemoEvent) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(event)?)
}

pub fn decode_event(text: &str) -> Result<MemoEvent, ProtocolError> {
    Ok(serde_json::from_str(text)?)
}

/// Whether a close code means the peer meant to hang up.
pub fn is_intentional_close(code: u16) -> bool {
    code == CLOSE_NORMAL || code == CLOSE_GOING_AWAY
}

/// Reply to a text frame received on the ping channel, if any.
pub fn ping_reply(text: &str) -> Option<String> {
    if text == PONG {
        None
    } else {
        Some(format!("Echo: {}", text))
    }
}
