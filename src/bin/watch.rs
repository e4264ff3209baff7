//! memo-sync-watch: follow memo changes from a terminal
//!
//! Usage:
//!   memo-sync-watch                                  # public listing
//!   memo-sync-watch --user alice --scope all         # everything alice can see
//!   memo-sync-watch --user alice --memo <id>         # also follow one memo
//!   memo-sync-watch --poll-only                      # no realtime channel

use clap::Parser;
use memo_sync::cli::WatchArgs;
use memo_sync::client::{CacheChange, SyncClient};
use memo_sync::config::SyncConfig;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let args = WatchArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match SyncConfig::load_or_default(args.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let client = SyncClient::connect_http(config, &args.server, args.user.clone(), args.scope);
    let mut changes = client.subscribe_changes();

    match client.refresh_list().await {
        Ok(_) => {
            let cache = client.cache().read().await;
            println!("{} memos ({})", cache.len(), args.scope);
            for memo in cache.memos() {
                println!("  {}  {}", memo.id, memo.title);
            }
        }
        Err(e) => {
            eprintln!("Failed to list memos from {}: {}", args.server, e);
            std::process::exit(1);
        }
    }

    client.watch_list().await;
    if let Some(id) = &args.memo {
        client.watch_memo(id).await;
        if let Err(e) = client.refresh_memo(id).await {
            eprintln!("Failed to load memo {}: {}", id, e);
        }
    }

    let ticker = client.start();
    if !args.poll_only {
        client.connect_realtime().await;
    }

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            change = changes.recv() => match change {
                Ok(change) => print_change(&client, change).await,
                Err(RecvError::Lagged(n)) => eprintln!("(skipped {} changes)", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    ticker.abort();
    client.shutdown().await;
}

async fn print_change(client: &SyncClient, change: CacheChange) {
    match change {
        CacheChange::Upserted(id) => {
            let cache = client.cache().read().await;
            if let Some(memo) = cache.get(&id) {
                println!(
                    "~ {}  {}  (updated {})",
                    memo.id,
                    memo.title,
                    memo.updated_at.format("%H:%M:%S")
                );
            }
        }
        CacheChange::Removed(id) => println!("- {}", id),
        CacheChange::SelectionCleared { id, reason } => println!("! {}: {}", id, reason),
    }
}
