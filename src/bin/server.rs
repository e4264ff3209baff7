//! memo-sync-server: memo HTTP API with realtime change push
//!
//! Usage:
//!   memo-sync-server                          # in-memory, port 3000
//!   memo-sync-server --database memos.redb    # persist to a redb file
//!   memo-sync-server --config sync.json       # override heartbeat timing

use clap::Parser;
use memo_sync::cli::ServerArgs;
use memo_sync::config::SyncConfig;
use memo_sync::{build_server, RouterConfig};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let args = ServerArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match SyncConfig::load_or_default(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("[server] Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    match &args.database {
        Some(path) => tracing::info!("[server] Using database {:?}", path),
        None => tracing::info!("[server] No database given, memos are kept in memory"),
    }

    let server = match build_server(RouterConfig {
        database: args.database.clone(),
        clock: None,
        heartbeat: config.heartbeat(),
        events_capacity: config.events_capacity,
    }) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("[server] Failed to open store: {}", e);
            std::process::exit(1);
        }
    };

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("[server] Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("[server] Listening on http://{}", addr);

    if let Err(e) = axum::serve(listener, server.router)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            tracing::info!("[server] Received Ctrl+C, shutting down");
        })
        .await
    {
        tracing::error!("[server] Server error: {}", e);
        std::process::exit(1);
    }
}
