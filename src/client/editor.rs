//! Auto-saving editor for one memo.
//!
//! Edits accumulate locally and are saved after `auto_save_delay` without
//! further input, or immediately on blur. Every save carries the baseline
//! the edit started from, and a successful save adopts the token the server
//! returned so the next save from this editor is not mistaken for a stale one.

use super::error::SyncError;
use super::gate::EditGate;
use super::queue::{UpdateQueue, UpdateTask};
use crate::memo::{Memo, MemoChanges, MemoId};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

/// Outcome of a save, for whoever shows status to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorNotice {
    Saved(Memo),
    /// Someone else saved first. Local changes are kept aside until `reload`.
    Conflict(String),
    NotFound,
    /// Transient failure; the changes stay pending for the next save.
    Failed(String),
}

struct EditorState {
    baseline: DateTime<Utc>,
    pending: MemoChanges,
    rejected: Option<MemoChanges>,
    generation: u64,
    debounce: Option<JoinHandle<()>>,
}

struct EditorInner {
    memo_id: MemoId,
    queue: Arc<UpdateQueue>,
    gate: EditGate,
    auto_save_delay: Duration,
    state: Mutex<EditorState>,
    save_lock: Mutex<()>,
    notices: broadcast::Sender<EditorNotice>,
}

#[derive(Clone)]
pub struct MemoEditor {
    inner: Arc<EditorInner>,
}

impl MemoEditor {
    pub fn new(
        memo: &Memo,
        queue: Arc<UpdateQueue>,
        gate: EditGate,
        auto_save_delay: Duration,
    ) -> Self {
        let (notices, _) = broadcast::channel(16);
        Self {
            inner: Arc::new(EditorInner {
                memo_id: memo.id.clone(),
                queue,
                gate,
                auto_save_delay,
                state: Mutex::new(EditorState {
                    baseline: memo.client_updated_at,
                    pending: MemoChanges::default(),
                    rejected: None,
                    generation: 0,
                    debounce: None,
                }),
                save_lock: Mutex::new(()),
                notices,
            }),
        }
    }

    pub fn memo_id(&self) -> &str {
        &self.inner.memo_id
    }

    /// The version subsequent saves claim to be based on.
    pub async fn baseline(&self) -> DateTime<Utc> {
        self.inner.state.lock().await.baseline
    }

    pub async fn has_unsaved_changes(&self) -> bool {
        !self.inner.state.lock().await.pending.is_empty()
    }

    /// Changes set aside by the last conflict, if any.
    pub async fn rejected_changes(&self) -> Option<MemoChanges> {
        self.inner.state.lock().await.rejected.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<EditorNotice> {
        self.inner.notices.subscribe()
    }

    /// Record a local change and restart the auto-save timer.
    pub async fn edit(&self, changes: MemoChanges) {
        self.inner.gate.note_input(&self.inner.memo_id).await;

        let mut state = self.inner.state.lock().await;
        state.pending.merge(changes);
        state.generation += 1;
        if let Some(timer) = state.debounce.take() {
            timer.abort();
        }

        let editor = self.clone();
        let generation = state.generation;
        state.debounce = Some(tokio::spawn(async move {
            tokio::time::sleep(editor.inner.auto_save_delay).await;
            editor.auto_save(generation).await;
        }));
    }

    async fn auto_save(&self, generation: u64) {
        {
            let mut state = self.inner.state.lock().await;
            if state.generation != generation {
                return;
            }
            state.debounce = None;
        }
        if let Err(e) = self.save().await {
            tracing::debug!("auto-save of {} failed: {}", self.inner.memo_id, e);
        }
    }

    /// Submit pending changes now. `Ok(None)` when there was nothing to save.
    pub async fn save(&self) -> Result<Option<Memo>, SyncError> {
        let _saving = self.inner.save_lock.lock().await;

        let (changes, baseline) = {
            let mut state = self.inner.state.lock().await;
            if state.pending.is_empty() {
                return Ok(None);
            }
            (std::mem::take(&mut state.pending), state.baseline)
        };

        let task = UpdateTask::new(self.inner.memo_id.clone(), changes.clone(), baseline);
        let result = self.inner.queue.enqueue(task).await;

        let mut state = self.inner.state.lock().await;
        match result {
            Ok(memo) => {
                state.baseline = memo.client_updated_at;
                self.notify(EditorNotice::Saved(memo.clone()));
                Ok(Some(memo))
            }
            Err(e) => {
                match &e {
                    SyncError::Conflict(_) => {
                        let mut rejected = state.rejected.take().unwrap_or_default();
                        rejected.merge(changes);
                        state.rejected = Some(rejected);
                        self.notify(EditorNotice::Conflict(e.user_message()));
                    }
                    SyncError::NotFound(_) => {
                        self.notify(EditorNotice::NotFound);
                    }
                    _ => {
                        let mut restored = changes;
                        restored.merge(std::mem::take(&mut state.pending));
                        state.pending = restored;
                        self.notify(EditorNotice::Failed(e.user_message()));
                    }
                }
                Err(e)
            }
        }
    }

    /// Adopt `fresh` as the new baseline after a conflict. With `reapply`,
    /// the rejected changes are queued again on top of it; otherwise they
    /// are discarded. Returns whether anything is now pending.
    pub async fn reload(&self, fresh: &Memo, reapply: bool) -> bool {
        let mut state = self.inner.state.lock().await;
        state.baseline = fresh.client_updated_at;
        if let Some(rejected) = state.rejected.take() {
            if reapply {
                let mut merged = rejected;
                merged.merge(std::mem::take(&mut state.pending));
                state.pending = merged;
            }
        }
        !state.pending.is_empty()
    }

    /// Focus left the editor: resume polling and flush.
    pub async fn blur(&self) -> Result<Option<Memo>, SyncError> {
        {
            let mut state = self.inner.state.lock().await;
            state.generation += 1;
            if let Some(timer) = state.debounce.take() {
                timer.abort();
            }
        }
        self.inner.gate.blur(&self.inner.memo_id).await;
        self.save().await
    }

    /// Flush and release the gate state for this memo.
    pub async fn close(&self) -> Result<Option<Memo>, SyncError> {
        let result = self.blur().await;
        self.inner.gate.forget(&self.inner.memo_id).await;
        result
    }

    fn notify(&self, notice: EditorNotice) {
        let _ = self.inner.notices.send(notice);
    }
}
