//! End-to-end tests for the sync client against a running server.

use chrono::Utc;
use memo_sync::client::{
    CacheChange, EditorNotice, HttpMemoApi, LocalMemoApi, MemoApi, SyncClient, SyncError,
    UpdateQueue, UpdateTask,
};
use memo_sync::clock::ManualClock;
use memo_sync::config::SyncConfig;
use memo_sync::memo::{ListScope, MemoChanges, NewMemo, UpdateMemoRequest};
use memo_sync::store::{MemoStore, MemoryBackend};
use memo_sync::{build_server, MemoServer, RouterConfig};
use std::sync::Arc;
use std::time::Duration;

async fn spawn_server() -> (String, MemoServer) {
    let server = build_server(RouterConfig::default()).unwrap();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = server.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (format!("http://{}", addr), server)
}

fn fast_config() -> SyncConfig {
    SyncConfig {
        poll_interval_ms: 100,
        reconnect_delay_ms: 100,
        ..SyncConfig::default()
    }
}

fn new_memo(title: &str, is_public: bool) -> NewMemo {
    NewMemo {
        title: title.to_string(),
        content: Some("body".to_string()),
        is_public,
    }
}

#[tokio::test]
async fn test_second_tab_with_stale_baseline_gets_conflict() {
    let (url, _server) = spawn_server().await;
    let tab_a = HttpMemoApi::new(&url, Some("alice".to_string()));
    let tab_b = HttpMemoApi::new(&url, Some("alice".to_string()));

    let memo = tab_a.create(&new_memo("Plan", true)).await.unwrap();
    let seen_by_a = tab_a.get(&memo.id).await.unwrap().memo;
    let seen_by_b = tab_b.get(&memo.id).await.unwrap().memo;

    let saved = tab_a
        .update(
            &memo.id,
            &UpdateMemoRequest {
                changes: MemoChanges::content("from a"),
                client_updated_at: seen_by_a.client_updated_at,
            },
        )
        .await
        .unwrap();
    assert!(saved.client_updated_at > seen_by_a.client_updated_at);

    let err = tab_b
        .update(
            &memo.id,
            &UpdateMemoRequest {
                changes: MemoChanges::content("from b"),
                client_updated_at: seen_by_b.client_updated_at,
            },
        )
        .await
        .unwrap_err();
    match err {
        SyncError::Conflict(message) => assert!(message.contains("Conflict")),
        other => panic!("expected conflict, got {:?}", other),
    }

    let stored = tab_b.get(&memo.id).await.unwrap().memo;
    assert_eq!(stored.content.as_deref(), Some("from a"));
}

#[tokio::test]
async fn test_http_errors_map_to_sync_errors() {
    let (url, _server) = spawn_server().await;
    let alice = HttpMemoApi::new(&url, Some("alice".to_string()));
    let bob = HttpMemoApi::new(&url, Some("bob".to_string()));
    let anonymous = HttpMemoApi::new(&url, None);

    let memo = alice.create(&new_memo("Secret", false)).await.unwrap();

    assert!(matches!(
        bob.get(&memo.id).await,
        Err(SyncError::Unauthorized(_))
    ));
    assert!(matches!(
        anonymous.create(&new_memo("x", true)).await,
        Err(SyncError::Unauthorized(_))
    ));
    assert!(matches!(
        alice.get("missing").await,
        Err(SyncError::NotFound(_))
    ));
    assert!(matches!(
        alice.create(&new_memo("", true)).await,
        Err(SyncError::Rejected(_))
    ));

    alice.delete(&memo.id).await.unwrap();
    assert!(alice.list(ListScope::All).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_realtime_fanout_and_polling_fallback() {
    let (url, server) = spawn_server().await;

    let mut live = Vec::new();
    for _ in 0..3 {
        let client = SyncClient::connect_http(fast_config(), &url, None, ListScope::Public);
        client.connect_realtime().await;
        live.push(client);
    }
    let poller = SyncClient::connect_http(fast_config(), &url, None, ListScope::Public);
    poller.watch_list().await;
    let ticker = poller.start();

    for _ in 0..100 {
        if server.hub.connection_count().await == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.hub.connection_count().await, 3);

    let author = HttpMemoApi::new(&url, Some("alice".to_string()));
    let memo = author.create(&new_memo("Broadcast", true)).await.unwrap();

    for client in live.iter().chain(std::iter::once(&poller)) {
        let mut found = false;
        for _ in 0..100 {
            if client.cache().read().await.get(&memo.id).is_some() {
                found = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(found, "memo never reached a client");
    }

    author.delete(&memo.id).await.unwrap();
    for client in &live {
        let mut gone = false;
        for _ in 0..100 {
            if client.cache().read().await.is_deleted(&memo.id) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "delete never reached a client");
    }

    ticker.abort();
    for client in &live {
        client.shutdown().await;
    }
}

#[tokio::test]
async fn test_ping_channel_greets_and_echoes() {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let (url, _server) = spawn_server().await;
    let ws_url = format!("{}/api/ping/ws", url.replacen("http://", "ws://", 1));
    let (mut socket, _) = tokio_tungstenite::connect_async(ws_url).await.unwrap();

    let mut texts = Vec::new();
    while texts.len() < 2 {
        if let Message::Text(text) = socket.next().await.unwrap().unwrap() {
            let text = text.to_string();
            if text == "Welcome to Ping WebSocket!" {
                socket.send(Message::Text("hello".into())).await.unwrap();
            }
            if text != "ping" {
                texts.push(text);
            }
        }
    }
    assert_eq!(texts, vec!["Welcome to Ping WebSocket!", "Echo: hello"]);
}

#[tokio::test]
async fn test_deleted_while_viewing_clears_selection() {
    let (url, _server) = spawn_server().await;
    let author = HttpMemoApi::new(&url, Some("alice".to_string()));
    let memo = author.create(&new_memo("Short-lived", true)).await.unwrap();

    let viewer = SyncClient::connect_http(
        fast_config(),
        &url,
        Some("bob".to_string()),
        ListScope::Public,
    );
    viewer.watch_memo(&memo.id).await;
    viewer.refresh_memo(&memo.id).await.unwrap();
    assert_eq!(
        viewer.cache().read().await.selected().map(|m| m.title.clone()),
        Some("Short-lived".to_string())
    );
    assert!(!viewer.cache().read().await.selected_is_owner());

    author.delete(&memo.id).await.unwrap();
    let changes = viewer.refresh_memo(&memo.id).await.unwrap();

    assert!(changes.contains(&CacheChange::SelectionCleared {
        id: memo.id.clone(),
        reason: "Memo not found".to_string(),
    }));
    assert!(viewer.cache().read().await.selected().is_none());
}

#[tokio::test]
async fn test_realtime_send_without_connection_fails() {
    let client = SyncClient::connect_http(
        fast_config(),
        "http://127.0.0.1:9",
        None,
        ListScope::Public,
    );
    let err = client
        .connection()
        .send(&serde_json::json!({"type": "noop"}))
        .await
        .unwrap_err();
    assert_eq!(err, SyncError::NotConnected);
    assert!(!client.connection().is_open().await);
}

fn local_store() -> Arc<MemoStore> {
    Arc::new(MemoStore::new(
        Arc::new(MemoryBackend::new()),
        Arc::new(ManualClock::new(Utc::now())),
    ))
}

#[tokio::test(start_paused = true)]
async fn test_queue_isolates_failures_and_preserves_order() {
    let store = local_store();
    let first = store.create("alice", new_memo("one", true)).await.unwrap();
    let second = store.create("alice", new_memo("two", true)).await.unwrap();

    let api: Arc<dyn MemoApi> = Arc::new(LocalMemoApi::new(store.clone(), Some("alice".into())));
    let queue = UpdateQueue::new(api);

    let a = queue.submit(UpdateTask::new(
        first.id.clone(),
        MemoChanges::title("one, edited"),
        first.client_updated_at,
    ));
    let stale = queue.submit(UpdateTask::new(
        first.id.clone(),
        MemoChanges::title("lost"),
        first.client_updated_at,
    ));
    let b = queue.submit(UpdateTask::new(
        second.id.clone(),
        MemoChanges::title("two, edited"),
        second.client_updated_at,
    ));

    assert_eq!(a.await.unwrap().title, "one, edited");
    assert!(stale.await.unwrap_err().is_conflict());
    assert_eq!(b.await.unwrap().title, "two, edited");

    let stored = store.get(&first.id, None).await.unwrap().memo;
    assert_eq!(stored.title, "one, edited");
}

#[tokio::test(start_paused = true)]
async fn test_detail_poll_paused_while_typing() {
    let store = local_store();
    let memo = store.create("alice", new_memo("Notes", true)).await.unwrap();

    let api: Arc<dyn MemoApi> = Arc::new(LocalMemoApi::new(store.clone(), Some("bob".into())));
    let connection = memo_sync::client::ConnectionManager::new(
        "ws://unused",
        Arc::new(memo_sync::client::TungsteniteConnector),
        Duration::from_secs(5),
    );
    let client = SyncClient::new(
        SyncConfig::default(),
        api,
        connection,
        ListScope::Public,
        Some("bob".to_string()),
    );
    client.watch_memo(&memo.id).await;
    client.refresh_memo(&memo.id).await.unwrap();
    let ticker = client.start();

    client.gate().note_input(&memo.id).await;
    store
        .update(&memo.id, "alice", &MemoChanges::title("Remote"), memo.client_updated_at)
        .await
        .unwrap();

    // Keep typing through the first tick at 5s.
    for _ in 0..12 {
        tokio::time::sleep(Duration::from_millis(450)).await;
        client.gate().note_input(&memo.id).await;
    }
    assert_eq!(client.cache().read().await.selected().unwrap().title, "Notes");

    // Idle after 500ms, then picked up by the tick at 10s.
    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(client.cache().read().await.selected().unwrap().title, "Remote");
    ticker.abort();
}

#[tokio::test(start_paused = true)]
async fn test_watching_memo_being_typed_in_starts_paused() {
    let store = local_store();
    let memo = store.create("alice", new_memo("Notes", true)).await.unwrap();

    let api: Arc<dyn MemoApi> = Arc::new(LocalMemoApi::new(store.clone(), Some("alice".into())));
    let connection = memo_sync::client::ConnectionManager::new(
        "ws://unused",
        Arc::new(memo_sync::client::TungsteniteConnector),
        Duration::from_secs(5),
    );
    let client = SyncClient::new(
        SyncConfig::default(),
        api,
        connection,
        ListScope::All,
        Some("alice".to_string()),
    );

    client.gate().note_input(&memo.id).await;
    client.watch_memo(&memo.id).await;
    assert_eq!(client.scheduler().is_enabled(&memo.id).await, Some(false));

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(client.scheduler().is_enabled(&memo.id).await, Some(true));
}

#[tokio::test(start_paused = true)]
async fn test_editor_through_client_reports_conflict() {
    let store = local_store();
    let memo = store.create("alice", new_memo("Shared", true)).await.unwrap();

    let api: Arc<dyn MemoApi> = Arc::new(LocalMemoApi::new(store.clone(), Some("alice".into())));
    let connection = memo_sync::client::ConnectionManager::new(
        "ws://unused",
        Arc::new(memo_sync::client::TungsteniteConnector),
        Duration::from_secs(5),
    );
    let client = SyncClient::new(
        SyncConfig::default(),
        api,
        connection,
        ListScope::All,
        Some("alice".to_string()),
    );

    let editor = client.open_editor(&memo);
    let mut notices = editor.notices();

    store
        .update(&memo.id, "alice", &MemoChanges::title("other tab"), memo.client_updated_at)
        .await
        .unwrap();

    editor.edit(MemoChanges::content("mine")).await;
    tokio::time::sleep(Duration::from_millis(1100)).await;

    match notices.recv().await.unwrap() {
        EditorNotice::Conflict(message) => assert!(message.contains("Someone else")),
        other => panic!("expected conflict, got {:?}", other),
    }
    assert_eq!(editor.rejected_changes().await, Some(MemoChanges::content("mine")));
}
