//! Realtime push of memo changes over WebSocket.

pub mod connection;
pub mod handler;
pub mod hub;
pub mod protocol;

pub use connection::{ConnectionId, OutgoingMessage, WsConnection};
pub use handler::{router, HeartbeatConfig};
pub use hub::Hub;
