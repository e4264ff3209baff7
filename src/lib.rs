pub mod api;
pub mod auth;
pub mod cli;
pub mod client;
pub mod clock;
pub mod config;
pub mod events;
pub mod memo;
pub mod store;
pub mod ws;

use axum::{routing::get, Router};
use clock::{Clock, SystemClock};
use events::MemoBroadcaster;
use std::path::PathBuf;
use std::sync::Arc;
use store::{MemoBackend, MemoStore, MemoryBackend, RedbBackend, StoreError};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use ws::{HeartbeatConfig, Hub};

/// Server construction options.
pub struct RouterConfig {
    /// redb file to persist memos in; memory only when `None`
    pub database: Option<PathBuf>,
    /// Clock stamping writes; the system clock when `None`
    pub clock: Option<Arc<dyn Clock>>,
    pub heartbeat: HeartbeatConfig,
    pub events_capacity: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            database: None,
            clock: None,
            heartbeat: HeartbeatConfig::default(),
            events_capacity: 256,
        }
    }
}

/// An assembled server: the router plus handles to what it serves.
pub struct MemoServer {
    pub router: Router,
    pub store: Arc<MemoStore>,
    pub hub: Arc<Hub>,
    pub relay: JoinHandle<()>,
}

/// In-memory server with default settings.
pub fn create_router() -> Router {
    assemble(Arc::new(MemoryBackend::new()), RouterConfig::default()).router
}

pub async fn create_router_with_config(config: RouterConfig) -> Result<Router, StoreError> {
    Ok(build_server(config)?.router)
}

/// Open the configured backend and wire the HTTP API, realtime channels
/// and the relay between them.
pub fn build_server(config: RouterConfig) -> Result<MemoServer, StoreError> {
    let backend: Arc<dyn MemoBackend> = match &config.database {
        Some(path) => Arc::new(RedbBackend::open(path)?),
        None => Arc::new(MemoryBackend::new()),
    };
    Ok(assemble(backend, config))
}

fn assemble(backend: Arc<dyn MemoBackend>, config: RouterConfig) -> MemoServer {
    let clock: Arc<dyn Clock> = config.clock.unwrap_or_else(|| Arc::new(SystemClock));
    let broadcaster = MemoBroadcaster::new(config.events_capacity);
    let store = Arc::new(MemoStore::new(backend, clock).with_broadcaster(broadcaster.clone()));

    let hub = Arc::new(Hub::new());
    let relay = hub.spawn_relay(&broadcaster);

    let router = Router::new()
        .route("/health", get(|| async { "OK" }))
        .merge(api::router(store.clone()))
        .merge(ws::router(hub.clone(), config.heartbeat))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    MemoServer {
        router,
        store,
        hub,
        relay,
    }
}
