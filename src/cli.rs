//! Command-line arguments for the binaries.

use crate::memo::ListScope;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "memo-sync-server", about = "Memo HTTP API with realtime change push")]
pub struct ServerArgs {
    /// Address to bind
    #[arg(long, env = "MEMO_SYNC_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(short, long, env = "MEMO_SYNC_PORT", default_value_t = 3000)]
    pub port: u16,

    /// redb database file; memos are kept in memory when omitted
    #[arg(long, env = "MEMO_SYNC_DATABASE")]
    pub database: Option<PathBuf>,

    /// JSON sync config file
    #[arg(long, env = "MEMO_SYNC_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(name = "memo-sync-watch", about = "Follow memo changes from a terminal")]
pub struct WatchArgs {
    /// Server base URL
    #[arg(long, env = "MEMO_SYNC_SERVER", default_value = "http://localhost:3000")]
    pub server: String,

    /// Act as this user (sent as the identity header)
    #[arg(long, env = "MEMO_SYNC_USER")]
    pub user: Option<String>,

    /// Listing scope to follow
    #[arg(long, default_value = "public", value_parser = parse_scope)]
    pub scope: ListScope,

    /// Also follow one memo's detail
    #[arg(long)]
    pub memo: Option<String>,

    /// Skip the realtime connection and rely on polling only
    #[arg(long)]
    pub poll_only: bool,

    /// JSON sync config file
    #[arg(long, env = "MEMO_SYNC_CONFIG")]
    pub config: Option<PathBuf>,
}

fn parse_scope(s: &str) -> Result<ListScope, String> {
    s.parse()
}
