//! Fan-out hub for realtime memo event connections.

use super::connection::{ConnectionId, WsConnection};
use super::protocol;
use crate::events::{MemoBroadcaster, MemoEvent};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// All live memo event connections on this server.
///
/// Every event goes to every connection. There is no filtering by
/// visibility or ownership here, so a private memo's update reaches clients
/// that cannot read it; recipients must treat payloads as public or
/// re-fetch through the access-checked HTTP API before using them.
#[derive(Default)]
pub struct Hub {
    connections: RwLock<HashMap<ConnectionId, Arc<RwLock<WsConnection>>>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to the hub.
    pub async fn add_connection(&self, conn: Arc<RwLock<WsConnection>>) {
        let id = conn.read().await.id.clone();
        self.connections.write().await.insert(id, conn);
    }

    /// Remove a connection from the hub.
    pub async fn remove_connection(&self, conn_id: &str) {
        self.connections.write().await.remove(conn_id);
    }

    /// Connections currently registered.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send an event to every connection. Best effort: a full or closed
    /// channel drops the event for that client. Closed connections are
    /// pruned. Returns the number of connections the event was queued for.
    pub async fn broadcast(&self, event: &MemoEvent) -> usize {
        let text = match protocol::encode_event(event) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("failed to encode {}: {}", event.kind(), e);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let connections = self.connections.read().await;
            for (conn_id, conn) in connections.iter() {
                let conn = conn.read().await;
                if conn.try_send_text(text.clone()) {
                    delivered += 1;
                } else if conn.is_closed() {
                    closed.push(conn_id.clone());
                } else {
                    tracing::warn!("dropping {} for slow connection {}", event.kind(), conn_id);
                }
            }
        }

        if !closed.is_empty() {
            let mut connections = self.connections.write().await;
            for conn_id in closed {
                connections.remove(&conn_id);
            }
        }

        tracing::debug!(
            "broadcast {} for memo {} to {} connections",
            event.kind(),
            event.memo_id(),
            delivered
        );
        delivered
    }

    /// Relay everything published on `broadcaster` to the hub's connections
    /// until the broadcaster is dropped.
    pub fn spawn_relay(self: &Arc<Self>, broadcaster: &MemoBroadcaster) -> JoinHandle<()> {
        let hub = self.clone();
        let mut events = broadcaster.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        hub.broadcast(&event).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("realtime relay lagged, {} events skipped", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            tracing::info!("realtime relay stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::connection::OutgoingMessage;
    use tokio::sync::mpsc;

    async fn connect(hub: &Hub) -> (String, mpsc::Receiver<OutgoingMessage>) {
        let (tx, rx) = mpsc::channel(8);
        let conn = WsConnection::new(tx);
        let id = conn.id.clone();
        hub.add_connection(Arc::new(RwLock::new(conn))).await;
        (id, rx)
    }

    fn expect_event(msg: Option<OutgoingMessage>) -> MemoEvent {
        match msg {
            Some(OutgoingMessage::Text(text)) => protocol::decode_event(&text).unwrap(),
            other => panic!("expected text frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_connection() {
        let hub = Hub::new();
        let (_, mut a) = connect(&hub).await;
        let (_, mut b) = connect(&hub).await;
        let (_, mut c) = connect(&hub).await;

        let delivered = hub.broadcast(&MemoEvent::deleted("m1")).await;
        assert_eq!(delivered, 3);

        for rx in [&mut a, &mut b, &mut c] {
            assert_eq!(expect_event(rx.recv().await), MemoEvent::deleted("m1"));
        }
    }

    #[tokio::test]
    async fn test_removed_connection_gets_nothing() {
        let hub = Hub::new();
        let (id, mut gone) = connect(&hub).await;
        let (_, mut live) = connect(&hub).await;

        hub.remove_connection(&id).await;
        assert_eq!(hub.broadcast(&MemoEvent::deleted("m1")).await, 1);

        assert!(live.try_recv().is_ok());
        assert!(gone.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_connections_are_pruned() {
        let hub = Hub::new();
        let (_, dropped) = connect(&hub).await;
        let (_, _live) = connect(&hub).await;
        drop(dropped);

        assert_eq!(hub.broadcast(&MemoEvent::deleted("m1")).await, 1);
        assert_eq!(hub.connection_count().await, 1);
    }

    #[tokio::test]
    async fn test_relay_forwards_published_events() {
        let hub = Arc::new(Hub::new());
        let broadcaster = MemoBroadcaster::new(8);
        let (_, mut rx) = connect(&hub).await;
        let relay = hub.spawn_relay(&broadcaster);

        broadcaster.publish(MemoEvent::deleted("m9"));
        assert_eq!(expect_event(rx.recv().await), MemoEvent::deleted("m9"));

        drop(broadcaster);
        relay.await.unwrap();
    }
}
