//! Per-connection state for realtime WebSocket sessions.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Server-assigned UUID of a realtime connection.
pub type ConnectionId = String;

/// One client on the memo event channel, as seen by the hub.
#[derive(Debug)]
pub struct WsConnection {
    pub id: ConnectionId,

    /// When the connection was accepted
    pub connected_at: Instant,

    /// Last frame received from the client (pongs included)
    pub last_activity: Instant,

    /// Queue drained by the socket task
    pub sender: mpsc::Sender<OutgoingMessage>,
}

/// Frame queued for a client socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingMessage {
    /// UTF-8 text frame (encoded event envelope)
    Text(String),
    /// Terminate the socket
    Close,
}

impl WsConnection {
    pub fn new(sender: mpsc::Sender<OutgoingMessage>) -> Self {
        let now = Instant::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            connected_at: now,
            last_activity: now,
            sender,
        }
    }

    /// Record that the client is still alive.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    /// True once the client has been silent for longer than `timeout`.
    pub fn is_stale(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// Queue without waiting; false when the queue is full or the socket is gone.
    pub fn try_send(&self, msg: OutgoingMessage) -> bool {
        self.sender.try_send(msg).is_ok()
    }

    pub fn try_send_text(&self, text: String) -> bool {
        self.try_send(OutgoingMessage::Text(text))
    }

    /// Whether the socket task behind this connection has gone away.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}
