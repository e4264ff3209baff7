//! Client-side synchronization.
//!
//! [`SyncClient`] ties the pieces together for one screen: a cache fed by
//! polls and realtime events, a scheduler driving the polls, and the edit
//! gate pausing polls of memos being typed in. Each editor gets its own
//! update queue, so a slow save on one memo never holds up another.

pub mod api;
pub mod cache;
pub mod connection;
pub mod editor;
pub mod error;
pub mod gate;
pub mod queue;
pub mod scheduler;

pub use api::{HttpMemoApi, LocalMemoApi, MemoApi};
pub use cache::{CacheChange, MemoCache};
pub use connection::{ConnectionManager, ConnectionStatus, Connector, TungsteniteConnector};
pub use editor::{EditorNotice, MemoEditor};
pub use error::SyncError;
pub use gate::EditGate;
pub use queue::{UpdateQueue, UpdateTask};
pub use scheduler::{PollHandle, PollScheduler};

use crate::config::SyncConfig;
use crate::events::MemoEvent;
use crate::memo::{ListScope, Memo};
use crate::ws::protocol::MEMO_EVENTS_PATH;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;

pub struct SyncClient {
    config: SyncConfig,
    api: Arc<dyn MemoApi>,
    scheduler: Arc<PollScheduler>,
    gate: EditGate,
    connection: ConnectionManager,
    cache: Arc<RwLock<MemoCache>>,
    changes: broadcast::Sender<CacheChange>,
}

impl SyncClient {
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: SyncConfig,
        api: Arc<dyn MemoApi>,
        connection: ConnectionManager,
        scope: ListScope,
        viewer: Option<String>,
    ) -> Self {
        let scheduler = Arc::new(PollScheduler::new(config.poll_interval()));
        let gate = EditGate::new(scheduler.clone(), config.edit_idle());
        let (changes, _) = broadcast::channel(config.events_capacity);

        Self {
            config,
            api,
            scheduler,
            gate,
            connection,
            cache: Arc::new(RwLock::new(MemoCache::new(scope, viewer))),
            changes,
        }
    }

    /// Client for a server at `server_url` (`http://` or `https://`).
    pub fn connect_http(
        config: SyncConfig,
        server_url: &str,
        user: Option<String>,
        scope: ListScope,
    ) -> Self {
        let api = Arc::new(HttpMemoApi::new(server_url, user.clone()));
        let connection = ConnectionManager::new(
            connection::ws_base_url(server_url),
            Arc::new(TungsteniteConnector),
            config.reconnect_delay(),
        );
        Self::new(config, api, connection, scope, user)
    }

    pub fn api(&self) -> &Arc<dyn MemoApi> {
        &self.api
    }

    pub fn scheduler(&self) -> &Arc<PollScheduler> {
        &self.scheduler
    }

    pub fn gate(&self) -> &EditGate {
        &self.gate
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn cache(&self) -> &Arc<RwLock<MemoCache>> {
        &self.cache
    }

    pub fn subscribe_changes(&self) -> broadcast::Receiver<CacheChange> {
        self.changes.subscribe()
    }

    /// Start the poll ticker.
    pub fn start(&self) -> JoinHandle<()> {
        self.scheduler.spawn()
    }

    /// Open the realtime channel and fold its events into the cache.
    pub async fn connect_realtime(&self) -> JoinHandle<()> {
        let (tx, mut rx) = mpsc::unbounded_channel::<MemoEvent>();
        self.connection
            .subscribe(move |event| {
                let _ = tx.send(event.clone());
            })
            .await;

        let cache = self.cache.clone();
        let changes = self.changes.clone();
        let applier = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let applied = cache.write().await.apply_event(&event);
                publish(&changes, applied);
            }
        });

        self.connection.ensure_connected(MEMO_EVENTS_PATH).await;
        applier
    }

    /// Fetch the listing once.
    pub async fn refresh_list(&self) -> Result<Vec<CacheChange>, SyncError> {
        refresh_list(&self.api, &self.cache, &self.changes).await
    }

    /// Refresh the listing on every tick.
    pub async fn watch_list(&self) -> PollHandle {
        let scope = self.cache.read().await.scope();
        let api = self.api.clone();
        let cache = self.cache.clone();
        let changes = self.changes.clone();
        self.scheduler
            .register(format!("list:{}", scope), move || {
                let api = api.clone();
                let cache = cache.clone();
                let changes = changes.clone();
                async move {
                    refresh_list(&api, &cache, &changes).await?;
                    Ok(())
                }
            })
            .await
    }

    /// Fetch one memo's detail once.
    pub async fn refresh_memo(&self, id: &str) -> Result<Vec<CacheChange>, SyncError> {
        refresh_memo(&self.api, &self.cache, &self.changes, id).await
    }

    /// Select `id` and refresh its detail on every tick. The poll is keyed
    /// by memo id, which is also the key the edit gate pauses; a memo being
    /// typed in starts out paused.
    pub async fn watch_memo(&self, id: &str) -> PollHandle {
        self.cache.write().await.select(id);

        let api = self.api.clone();
        let cache = self.cache.clone();
        let changes = self.changes.clone();
        let key = id.to_string();
        let handle = self
            .scheduler
            .register(id, move || {
                let api = api.clone();
                let cache = cache.clone();
                let changes = changes.clone();
                let key = key.clone();
                async move {
                    refresh_memo(&api, &cache, &changes, &key).await?;
                    Ok(())
                }
            })
            .await;

        if self.gate.is_actively_editing(id).await {
            self.scheduler.disable(id).await;
            // The idle timer may have fired in between
            if !self.gate.is_actively_editing(id).await {
                self.scheduler.enable(id).await;
            }
        }
        handle
    }

    pub async fn unwatch(&self, handle: &PollHandle) -> bool {
        self.scheduler.unregister(handle).await
    }

    /// Editor for `memo` with its own update queue.
    pub fn open_editor(&self, memo: &Memo) -> MemoEditor {
        MemoEditor::new(
            memo,
            Arc::new(UpdateQueue::new(self.api.clone())),
            self.gate.clone(),
            self.config.auto_save_delay(),
        )
    }

    pub async fn shutdown(&self) {
        self.connection.disconnect().await;
    }
}

fn publish(changes: &broadcast::Sender<CacheChange>, applied: Vec<CacheChange>) {
    for change in applied {
        let _ = changes.send(change);
    }
}

async fn refresh_list(
    api: &Arc<dyn MemoApi>,
    cache: &RwLock<MemoCache>,
    changes: &broadcast::Sender<CacheChange>,
) -> Result<Vec<CacheChange>, SyncError> {
    let scope = cache.read().await.scope();
    let issued_at = Utc::now();
    let memos = api.list(scope).await?;
    let applied = cache.write().await.apply_list(memos, issued_at);
    publish(changes, applied.clone());
    Ok(applied)
}

async fn refresh_memo(
    api: &Arc<dyn MemoApi>,
    cache: &RwLock<MemoCache>,
    changes: &broadcast::Sender<CacheChange>,
    id: &str,
) -> Result<Vec<CacheChange>, SyncError> {
    let result = api.get(id).await;
    let transient = match &result {
        Err(e) if e.is_transient() => Some(e.clone()),
        _ => None,
    };

    let applied = cache.write().await.apply_detail(id, result);
    publish(changes, applied.clone());

    match transient {
        Some(e) => Err(e),
        None => Ok(applied),
    }
}
