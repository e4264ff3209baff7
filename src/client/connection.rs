//! Client side of the realtime channel.
//!
//! One `ConnectionManager` owns at most one connection. Incoming events are
//! parsed once and handed to every subscriber in registration order. Closes
//! other than normal/going-away schedule a single reconnect attempt after
//! `reconnect_delay`; a successful open cancels any pending attempt.

use super::error::SyncError;
use crate::events::MemoEvent;
use crate::ws::protocol::{self, CLOSE_ABNORMAL, CLOSE_NORMAL};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

/// What travels over a `Link`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Close(u16),
}

/// An open connection. Dropping `outgoing` closes it; `incoming` ends when
/// the peer goes away.
pub struct Link {
    pub outgoing: mpsc::Sender<Frame>,
    pub incoming: mpsc::Receiver<Frame>,
}

/// Opens links to a URL.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Link, SyncError>;
}

/// `Connector` over tokio-tungstenite.
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Link, SyncError> {
        let (ws, _response) = connect_async(url)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let (mut sink, mut stream) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Frame>(64);
        let (in_tx, in_rx) = mpsc::channel::<Frame>(64);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    frame = out_rx.recv() => match frame {
                        Some(Frame::Text(text)) => {
                            if let Err(e) = sink.send(Message::Text(text.into())).await {
                                tracing::warn!("realtime send failed: {}", e);
                                let _ = in_tx.send(Frame::Close(CLOSE_ABNORMAL)).await;
                                break;
                            }
                        }
                        Some(Frame::Close(code)) => {
                            let frame = CloseFrame {
                                code: CloseCode::from(code),
                                reason: "".into(),
                            };
                            let _ = sink.send(Message::Close(Some(frame))).await;
                            break;
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    msg = stream.next() => match msg {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(Frame::Text(text.to_string())).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let code = frame.map(|f| u16::from(f.code)).unwrap_or(CLOSE_ABNORMAL);
                            let _ = in_tx.send(Frame::Close(code)).await;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("realtime receive failed: {}", e);
                            let _ = in_tx.send(Frame::Close(CLOSE_ABNORMAL)).await;
                            break;
                        }
                        None => {
                            let _ = in_tx.send(Frame::Close(CLOSE_ABNORMAL)).await;
                            break;
                        }
                    },
                }
            }
        });

        Ok(Link {
            outgoing: out_tx,
            incoming: in_rx,
        })
    }
}

/// `ws://` or `wss://` base for an `http://` or `https://` server URL.
pub fn ws_base_url(server: &str) -> String {
    let server = server.trim_end_matches('/');
    if let Some(rest) = server.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = server.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        server.to_string()
    }
}

pub type Subscriber = Arc<dyn Fn(&MemoEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Idle,
    Connecting,
    Open,
}

struct State {
    status: ConnectionStatus,
    url: Option<String>,
    outgoing: Option<mpsc::Sender<Frame>>,
    reconnect: Option<JoinHandle<()>>,
    /// Bumped on every connect attempt and on disconnect; tasks holding an
    /// older value no longer own the connection.
    epoch: u64,
    manually_closed: bool,
}

struct Inner {
    base_url: String,
    connector: Arc<dyn Connector>,
    reconnect_delay: Duration,
    state: Mutex<State>,
    subscribers: RwLock<BTreeMap<SubscriberId, Subscriber>>,
    next_subscriber: AtomicU64,
}

#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        base_url: impl Into<String>,
        connector: Arc<dyn Connector>,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                base_url: base_url.into().trim_end_matches('/').to_string(),
                connector,
                reconnect_delay,
                state: Mutex::new(State {
                    status: ConnectionStatus::Idle,
                    url: None,
                    outgoing: None,
                    reconnect: None,
                    epoch: 0,
                    manually_closed: false,
                }),
                subscribers: RwLock::new(BTreeMap::new()),
                next_subscriber: AtomicU64::new(1),
            }),
        }
    }

    /// Connect to `path` unless a connection is already open or opening.
    pub async fn ensure_connected(&self, path: &str) {
        let url = format!("{}{}", self.inner.base_url, path);
        let mut state = self.inner.state.lock().await;
        state.manually_closed = false;
        if state.status != ConnectionStatus::Idle {
            tracing::debug!("realtime connection already {:?}", state.status);
            return;
        }
        self.inner.begin_connect(&mut state, url);
    }

    pub async fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().await.status
    }

    pub async fn is_open(&self) -> bool {
        self.status().await == ConnectionStatus::Open
    }

    /// Whether a reconnect attempt is scheduled.
    pub async fn reconnect_pending(&self) -> bool {
        self.inner.state.lock().await.reconnect.is_some()
    }

    pub async fn subscribe<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&MemoEvent) + Send + Sync + 'static,
    {
        let id = SubscriberId(self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst));
        self.inner
            .subscribers
            .write()
            .await
            .insert(id, Arc::new(handler));
        id
    }

    pub async fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.inner.subscribers.write().await.remove(&id).is_some()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().await.len()
    }

    /// Send a JSON message. Fails with `NotConnected` unless the connection
    /// is open.
    pub async fn send<T: Serialize>(&self, message: &T) -> Result<(), SyncError> {
        let text = serde_json::to_string(message).map_err(|e| SyncError::Decode(e.to_string()))?;
        let outgoing = {
            let state = self.inner.state.lock().await;
            match (&state.status, &state.outgoing) {
                (ConnectionStatus::Open, Some(tx)) => tx.clone(),
                _ => {
                    tracing::warn!("realtime send attempted while not connected");
                    return Err(SyncError::NotConnected);
                }
            }
        };
        outgoing
            .send(Frame::Text(text))
            .await
            .map_err(|_| SyncError::NotConnected)
    }

    /// Close normally, drop all subscribers, and suppress reconnects.
    pub async fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock().await;
            state.manually_closed = true;
            state.epoch += 1;
            state.status = ConnectionStatus::Idle;
            if let Some(tx) = state.outgoing.take() {
                let _ = tx.try_send(Frame::Close(CLOSE_NORMAL));
            }
            if let Some(timer) = state.reconnect.take() {
                timer.abort();
            }
        }
        self.inner.subscribers.write().await.clear();
        tracing::info!("realtime connection closed by client");
    }
}

impl Inner {
    fn begin_connect(self: &Arc<Self>, state: &mut State, url: String) {
        state.status = ConnectionStatus::Connecting;
        state.url = Some(url.clone());
        state.epoch += 1;
        let epoch = state.epoch;
        tokio::spawn(self.clone().run(url, epoch));
    }

    async fn run(self: Arc<Self>, url: String, epoch: u64) {
        tracing::debug!("connecting to {}", url);
        let link = match self.connector.connect(&url).await {
            Ok(link) => link,
            Err(e) => {
                tracing::warn!("realtime connect to {} failed: {}", url, e);
                self.connection_lost(epoch, CLOSE_ABNORMAL).await;
                return;
            }
        };

        {
            let mut state = self.state.lock().await;
            if state.epoch != epoch || state.manually_closed {
                let _ = link.outgoing.try_send(Frame::Close(CLOSE_NORMAL));
                return;
            }
            state.status = ConnectionStatus::Open;
            state.outgoing = Some(link.outgoing.clone());
            if let Some(timer) = state.reconnect.take() {
                timer.abort();
            }
        }
        tracing::info!("realtime connected to {}", url);

        let mut incoming = link.incoming;
        let code = loop {
            match incoming.recv().await {
                Some(Frame::Text(text)) => self.dispatch(&text).await,
                Some(Frame::Close(code)) => break code,
                None => break CLOSE_ABNORMAL,
            }
        };
        self.connection_lost(epoch, code).await;
    }

    async fn dispatch(&self, text: &str) {
        let event = match protocol::decode_event(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("ignoring realtime message: {}", e);
                return;
            }
        };

        let subscribers: Vec<Subscriber> =
            self.subscribers.read().await.values().cloned().collect();
        for subscriber in subscribers {
            if std::panic::catch_unwind(AssertUnwindSafe(|| subscriber(&event))).is_err() {
                tracing::error!("subscriber panicked on {} for {}", event.kind(), event.memo_id());
            }
        }
    }

    async fn connection_lost(self: &Arc<Self>, epoch: u64, code: u16) {
        let mut state = self.state.lock().await;
        if state.epoch != epoch {
            return;
        }
        state.status = ConnectionStatus::Idle;
        state.outgoing = None;

        if state.manually_closed {
            return;
        }
        if protocol::is_intentional_close(code) {
            tracing::info!("realtime connection closed with code {}", code);
            return;
        }
        if state.reconnect.is_some() {
            return;
        }
        let Some(url) = state.url.clone() else {
            return;
        };

        tracing::info!(
            "realtime connection lost (code {}), retrying in {:?}",
            code,
            self.reconnect_delay
        );
        let inner = self.clone();
        state.reconnect = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.reconnect_delay).await;
            let mut state = inner.state.lock().await;
            state.reconnect = None;
            if state.manually_closed || state.status != ConnectionStatus::Idle {
                return;
            }
            inner.begin_connect(&mut state, url);
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memo::Memo;
    use crate::ws::protocol::{encode_event, CLOSE_GOING_AWAY, MEMO_EVENTS_PATH};
    use chrono::Utc;
    use std::sync::atomic::AtomicUsize;

    /// Hands out links whose server ends the test controls.
    #[derive(Default)]
    struct MockConnector {
        attempts: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
        servers: Mutex<Vec<MockServer>>,
    }

    struct MockServer {
        to_client: mpsc::Sender<Frame>,
        from_client: mpsc::Receiver<Frame>,
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self, _url: &str) -> Result<Link, SyncError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::Transport("refused".to_string()));
            }
            let (to_client, incoming) = mpsc::channel(16);
            let (outgoing, from_client) = mpsc::channel(16);
            self.servers.lock().await.push(MockServer {
                to_client,
                from_client,
            });
            Ok(Link { outgoing, incoming })
        }
    }

    impl MockConnector {
        async fn latest(&self) -> MockServer {
            self.servers.lock().await.pop().unwrap()
        }
    }

    fn created(id: &str) -> String {
        let now = Utc::now();
        encode_event(&MemoEvent::MemoCreated(Memo {
            id: id.to_string(),
            title: "t".to_string(),
            content: None,
            is_public: true,
            author_id: "alice".to_string(),
            created_at: now,
            updated_at: now,
            client_updated_at: now,
        }))
        .unwrap()
    }

    fn setup() -> (Arc<MockConnector>, ConnectionManager) {
        let connector = Arc::new(MockConnector::default());
        let manager = ConnectionManager::new(
            "ws://localhost:3000",
            connector.clone(),
            Duration::from_millis(5000),
        );
        (connector, manager)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_connection_for_repeated_ensure() {
        let (connector, manager) = setup();
        manager.ensure_connected(MEMO_EVENTS_PATH).await;
        manager.ensure_connected(MEMO_EVENTS_PATH).await;
        settle().await;
        manager.ensure_connected(MEMO_EVENTS_PATH).await;

        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(manager.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_reach_subscribers_in_order_despite_bad_ones() {
        let (connector, manager) = setup();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));

        let first = seen.clone();
        manager
            .subscribe(move |e| first.lock().unwrap().push(format!("a:{}", e.memo_id())))
            .await;
        manager.subscribe(|_| panic!("bad subscriber")).await;
        let second = seen.clone();
        manager
            .subscribe(move |e| second.lock().unwrap().push(format!("b:{}", e.memo_id())))
            .await;

        manager.ensure_connected(MEMO_EVENTS_PATH).await;
        settle().await;
        let server = connector.latest().await;

        server.to_client.send(Frame::Text("not json".to_string())).await.unwrap();
        server.to_client.send(Frame::Text(created("m1"))).await.unwrap();
        server.to_client.send(Frame::Text(created("m2"))).await.unwrap();
        settle().await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["a:m1", "b:m1", "a:m2", "b:m2"]
        );
        assert!(manager.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abnormal_close_schedules_one_reconnect() {
        let (connector, manager) = setup();
        manager.ensure_connected(MEMO_EVENTS_PATH).await;
        settle().await;
        let server = connector.latest().await;

        server.to_client.send(Frame::Close(CLOSE_ABNORMAL)).await.unwrap();
        settle().await;
        assert_eq!(manager.status().await, ConnectionStatus::Idle);
        assert!(manager.reconnect_pending().await);

        tokio::time::sleep(Duration::from_millis(4990)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert!(manager.is_open().await);
        assert!(!manager.reconnect_pending().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_reconnect_retries_again() {
        let (connector, manager) = setup();
        connector.fail.store(true, Ordering::SeqCst);
        manager.ensure_connected(MEMO_EVENTS_PATH).await;
        settle().await;
        assert!(manager.reconnect_pending().await);

        tokio::time::sleep(Duration::from_millis(5010)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);

        connector.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert!(manager.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_intentional_close_does_not_reconnect() {
        for code in [CLOSE_NORMAL, CLOSE_GOING_AWAY] {
            let (connector, manager) = setup();
            manager.ensure_connected(MEMO_EVENTS_PATH).await;
            settle().await;
            let server = connector.latest().await;

            server.to_client.send(Frame::Close(code)).await.unwrap();
            settle().await;
            assert!(!manager.reconnect_pending().await);

            tokio::time::sleep(Duration::from_secs(30)).await;
            assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_clears_subscribers_and_suppresses_reconnect() {
        let (connector, manager) = setup();
        manager.subscribe(|_| {}).await;
        manager.ensure_connected(MEMO_EVENTS_PATH).await;
        settle().await;
        let mut server = connector.latest().await;

        manager.disconnect().await;
        assert_eq!(server.from_client.recv().await, Some(Frame::Close(CLOSE_NORMAL)));
        assert_eq!(manager.subscriber_count().await, 0);

        drop(server);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
        assert!(!manager.is_open().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_requires_open_connection() {
        let (connector, manager) = setup();
        let err = manager
            .send(&serde_json::json!({"type": "hello"}))
            .await
            .unwrap_err();
        assert_eq!(err, SyncError::NotConnected);

        manager.ensure_connected(MEMO_EVENTS_PATH).await;
        settle().await;
        let mut server = connector.latest().await;
        manager
            .send(&serde_json::json!({"type": "hello"}))
            .await
            .unwrap();
        assert_eq!(
            server.from_client.recv().await,
            Some(Frame::Text(r#"{"type":"hello"}"#.to_string()))
        );
    }

    #[test]
    fn test_ws_base_url() {
        assert_eq!(ws_base_url("http://localhost:3000/"), "ws://localhost:3000");
        assert_eq!(ws_base_url("https://memo.example"), "wss://memo.example");
    }
}
