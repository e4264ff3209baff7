//! Serial queue for memo updates.
//!
//! Updates are sent one at a time in submission order, so a later edit from
//! this client can never overtake an earlier one. Each task resolves on its
//! own; one failure does not affect the tasks behind it.

use super::api::MemoApi;
use super::error::SyncError;
use crate::memo::{Memo, MemoChanges, MemoId, UpdateMemoRequest};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};

/// One pending update: which memo, what changed, and the version the edit
/// started from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTask {
    pub memo_id: MemoId,
    pub changes: MemoChanges,
    pub client_updated_at: DateTime<Utc>,
}

impl UpdateTask {
    pub fn new(
        memo_id: impl Into<MemoId>,
        changes: MemoChanges,
        client_updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            memo_id: memo_id.into(),
            changes,
            client_updated_at,
        }
    }
}

struct QueuedTask {
    task: UpdateTask,
    reply: oneshot::Sender<Result<Memo, SyncError>>,
}

/// Resolves with the outcome of one submitted task.
pub struct PendingUpdate {
    rx: oneshot::Receiver<Result<Memo, SyncError>>,
}

impl Future for PendingUpdate {
    type Output = Result<Memo, SyncError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(SyncError::QueueClosed)))
    }
}

#[derive(Default)]
struct QueueStats {
    pending: AtomicUsize,
    processing: AtomicBool,
}

/// FIFO of update tasks drained by a single background task.
pub struct UpdateQueue {
    sender: mpsc::UnboundedSender<QueuedTask>,
    stats: Arc<QueueStats>,
}

impl UpdateQueue {
    /// Start the drain task. Must be called inside a tokio runtime.
    pub fn new(api: Arc<dyn MemoApi>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let stats = Arc::new(QueueStats::default());
        tokio::spawn(drain(api, receiver, stats.clone()));
        Self { sender, stats }
    }

    /// Append a task. The returned future may be dropped without cancelling it.
    pub fn submit(&self, task: UpdateTask) -> PendingUpdate {
        let (reply, rx) = oneshot::channel();
        self.stats.pending.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(QueuedTask { task, reply }).is_err() {
            self.stats.pending.fetch_sub(1, Ordering::SeqCst);
            tracing::warn!("update queue closed, dropping task");
        }
        PendingUpdate { rx }
    }

    /// Append a task and wait for its outcome.
    pub async fn enqueue(&self, task: UpdateTask) -> Result<Memo, SyncError> {
        self.submit(task).await
    }

    /// Tasks submitted but not yet resolved, including the one in flight.
    pub fn pending(&self) -> usize {
        self.stats.pending.load(Ordering::SeqCst)
    }

    pub fn is_processing(&self) -> bool {
        self.stats.processing.load(Ordering::SeqCst)
    }
}

async fn drain(
    api: Arc<dyn MemoApi>,
    mut receiver: mpsc::UnboundedReceiver<QueuedTask>,
    stats: Arc<QueueStats>,
) {
    while let Some(QueuedTask { task, reply }) = receiver.recv().await {
        stats.processing.store(true, Ordering::SeqCst);

        let request = UpdateMemoRequest {
            changes: task.changes,
            client_updated_at: task.client_updated_at,
        };
        let result = AssertUnwindSafe(api.update(&task.memo_id, &request))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(SyncError::Transport("update call panicked".to_string())));

        match &result {
            Ok(memo) => tracing::debug!(
                "update applied to {}, new token {}",
                memo.id,
                memo.client_updated_at
            ),
            Err(e) if e.is_conflict() => {
                tracing::warn!("update to {} rejected: {}", task.memo_id, e)
            }
            Err(e) => tracing::warn!("update to {} failed: {}", task.memo_id, e),
        }

        stats.processing.store(false, Ordering::SeqCst);
        stats.pending.fetch_sub(1, Ordering::SeqCst);

        if reply.send(result).is_err() {
            tracing::debug!("nobody waiting on update to {}", task.memo_id);
        }
    }
    tracing::debug!("update queue drained and closed");
}
