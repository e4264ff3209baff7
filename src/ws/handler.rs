//! WebSocket upgrade handlers for the memo event and ping channels.

use super::connection::{OutgoingMessage, WsConnection};
use super::hub::Hub;
use super::protocol::{self, MEMO_EVENTS_PATH, PING_PATH};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Liveness cadence for realtime connections.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    /// How often the memo channel pings each client
    pub interval: Duration,
    /// Silence after which a memo channel connection is terminated
    pub timeout: Duration,
    /// Cadence of the ping channel's text pings
    pub ping_interval: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(60),
            ping_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Clone)]
pub struct WsState {
    pub hub: Arc<Hub>,
    pub heartbeat: HeartbeatConfig,
}

pub fn router(hub: Arc<Hub>, heartbeat: HeartbeatConfig) -> Router {
    Router::new()
        .route(MEMO_EVENTS_PATH, get(memo_events_ws))
        .route(PING_PATH, get(ping_ws))
        .with_state(WsState { hub, heartbeat })
}

async fn memo_events_ws(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    ws.on_upgrade(move |socket| handle_memo_socket(socket, state))
}

async fn ping_ws(ws: WebSocketUpgrade, State(state): State<WsState>) -> Response {
    let interval = state.heartbeat.ping_interval;
    ws.on_upgrade(move |socket| handle_ping_socket(socket, interval))
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn handle_memo_socket(socket: WebSocket, state: WsState) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel(64);
    let conn = Arc::new(RwLock::new(WsConnection::new(tx)));
    let conn_id = conn.read().await.id.clone();

    state.hub.add_connection(conn.clone()).await;
    tracing::info!("memo channel connected: {}", conn_id);

    let mut heartbeat = ticker(state.heartbeat.interval);

    loop {
        tokio::select! {
            outgoing = rx.recv() => match outgoing {
                Some(OutgoingMessage::Text(text)) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Some(OutgoingMessage::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| f.code).unwrap_or(protocol::CLOSE_ABNORMAL);
                    tracing::info!("memo channel {} closed by client, code {}", conn_id, code);
                    break;
                }
                Some(Ok(msg)) => {
                    conn.write().await.touch();
                    if let Message::Text(text) = msg {
                        tracing::debug!("memo channel {} sent: {}", conn_id, text);
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("memo channel {} error: {}", conn_id, e);
                    break;
                }
                None => break,
            },
            _ = heartbeat.tick() => {
                if conn.read().await.is_stale(state.heartbeat.timeout) {
                    tracing::warn!("memo channel {} missed heartbeat, terminating", conn_id);
                    break;
                }
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    state.hub.remove_connection(&conn_id).await;
    tracing::info!("memo channel disconnected: {}", conn_id);
}

async fn handle_ping_socket(socket: WebSocket, period: Duration) {
    let (mut sink, mut stream) = socket.split();
    tracing::info!("ping channel connected");

    if sink
        .send(Message::Text(protocol::PING_WELCOME.to_string()))
        .await
        .is_err()
    {
        return;
    }

    let mut pings = ticker(period);

    loop {
        tokio::select! {
            _ = pings.tick() => {
                if let Err(e) = sink.send(Message::Text(protocol::PING.to_string())).await {
                    tracing::warn!("failed to send ping: {}", e);
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match protocol::ping_reply(&text) {
                    None => tracing::debug!("received pong"),
                    Some(reply) => {
                        if sink.send(Message::Text(reply)).await.is_err() {
                            break;
                        }
                    }
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!("ping channel error: {}", e);
                    break;
                }
            },
        }
    }

    tracing::info!("ping channel disconnected");
}
