//! Change notifications emitted by the store after every committed mutation.

use crate::memo::{Memo, MemoId};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Payload of a `memo_deleted` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedMemo {
    pub id: MemoId,
}

/// A committed memo mutation.
///
/// Serializes to the realtime envelope
/// `{"type": "memo_created" | "memo_updated" | "memo_deleted", "payload": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum MemoEvent {
    MemoCreated(Memo),
    MemoUpdated(Memo),
    MemoDeleted(DeletedMemo),
}

impl MemoEvent {
    pub fn deleted(id: impl Into<MemoId>) -> Self {
        MemoEvent::MemoDeleted(DeletedMemo { id: id.into() })
    }

    pub fn memo_id(&self) -> &str {
        match self {
            MemoEvent::MemoCreated(memo) | MemoEvent::MemoUpdated(memo) => &memo.id,
            MemoEvent::MemoDeleted(deleted) => &deleted.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MemoEvent::MemoCreated(_) => "memo_created",
            MemoEvent::MemoUpdated(_) => "memo_updated",
            MemoEvent::MemoDeleted(_) => "memo_deleted",
        }
    }
}

/// Fan-out point between the store and anything relaying its changes.
///
/// Publishing never blocks and never fails the mutation that triggered it:
/// with no listeners the event is simply dropped.
#[derive(Clone)]
pub struct MemoBroadcaster {
    sender: broadcast::Sender<MemoEvent>,
}

impl MemoBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current listeners.
    pub fn publish(&self, event: MemoEvent) {
        let kind = event.kind();
        match self.sender.send(event) {
            Ok(listeners) => tracing::debug!("published {} to {} listeners", kind, listeners),
            Err(_) => tracing::debug!("published {} with no listeners", kind),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MemoEvent> {
        self.sender.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for MemoBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
