//! Authoritative memo store with optimistic concurrency control.
//!
//! `MemoStore` is the only write path to memo rows. Every update carries the
//! `clientUpdatedAt` baseline the writer last saw; a baseline older than the
//! stored token is rejected with [`StoreError::Conflict`]. A successful write
//! restamps the token from the server clock, so a second writer racing on the
//! same stale baseline loses.

mod memory;
mod redb_backend;

pub use memory::MemoryBackend;
pub use redb_backend::RedbBackend;

use crate::clock::{Clock, SystemClock};
use crate::events::{MemoBroadcaster, MemoEvent};
use crate::memo::{ListScope, Memo, MemoChanges, MemoId, MemoView, NewMemo};
use async_trait::async_trait;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Errors from store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("memo not found: {0}")]
    NotFound(MemoId),
    #[error("not authorized for memo {0}")]
    Unauthorized(MemoId),
    #[error("conflict: memo {id} was updated at {stored}, edit was based on {submitted}")]
    Conflict {
        id: MemoId,
        stored: DateTime<Utc>,
        submitted: DateTime<Utc>,
    },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage error: {0}")]
    Backend(String),
}

/// Row-level persistence underneath the store. Implementations do no access
/// or concurrency checks of their own.
#[async_trait]
pub trait MemoBackend: Send + Sync {
    async fn load(&self, id: &str) -> Result<Option<Memo>, StoreError>;
    async fn save(&self, memo: &Memo) -> Result<(), StoreError>;
    async fn remove(&self, id: &str) -> Result<bool, StoreError>;
    async fn load_all(&self) -> Result<Vec<Memo>, StoreError>;
}

pub struct MemoStore {
    backend: Arc<dyn MemoBackend>,
    clock: Arc<dyn Clock>,
    broadcaster: Option<MemoBroadcaster>,
    /// Held across each read-check-write so the token comparison and the
    /// restamp are one step.
    write_lock: Mutex<()>,
}

impl MemoStore {
    pub fn new(backend: Arc<dyn MemoBackend>, clock: Arc<dyn Clock>) -> Self {
        Self {
            backend,
            clock,
            broadcaster: None,
            write_lock: Mutex::new(()),
        }
    }

    /// In-memory store on the system clock.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()), Arc::new(SystemClock))
    }

    /// Publish every committed mutation to `broadcaster`.
    pub fn with_broadcaster(mut self, broadcaster: MemoBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn broadcaster(&self) -> Option<&MemoBroadcaster> {
        self.broadcaster.as_ref()
    }

    /// Memos visible under `scope`, most recently updated first.
    pub async fn list(
        &self,
        scope: ListScope,
        viewer: Option<&str>,
    ) -> Result<Vec<Memo>, StoreError> {
        let mut memos: Vec<Memo> = self
            .backend
            .load_all()
            .await?
            .into_iter()
            .filter(|memo| scope.includes(memo, viewer))
            .collect();
        memos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(memos)
    }

    /// Read one memo. Private memos are only readable by their owner.
    pub async fn get(&self, id: &str, viewer: Option<&str>) -> Result<MemoView, StoreError> {
        let memo = self
            .backend
            .load(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

        if !memo.is_visible_to(viewer) {
            return Err(StoreError::Unauthorized(id.to_string()));
        }

        let is_owner = viewer.is_some_and(|v| memo.is_owned_by(v));
        Ok(MemoView { memo, is_owner })
    }

    /// Create a memo owned by `owner`. No concurrency check applies.
    pub async fn create(&self, owner: &str, new: NewMemo) -> Result<Memo, StoreError> {
        if new.title.trim().is_empty() {
            return Err(StoreError::InvalidInput("Title is required".to_string()));
        }

        let now = self.clock.now().trunc_subsecs(3);
        let memo = Memo {
            id: uuid::Uuid::new_v4().to_string(),
            title: new.title,
            content: new.content,
            is_public: new.is_public,
            author_id: owner.to_string(),
            created_at: now,
            updated_at: now,
            client_updated_at: now,
        };

        {
            let _guard = self.write_lock.lock().await;
            self.backend.save(&memo).await?;
        }

        tracing::info!("created memo {} for {}", memo.id, owner);
        self.publish(MemoEvent::MemoCreated(memo.clone()));
        Ok(memo)
    }

    /// Apply `changes` if `owner` owns the memo and `baseline` is not older
    /// than the stored `clientUpdatedAt`.
    ///
    /// On success the stored token becomes the server's current time, bumped
    /// past both the previous token and `baseline` when the clock has not
    /// moved beyond them. Resubmitting the same baseline therefore always
    /// conflicts.
    pub async fn update(
        &self,
        id: &str,
        owner: &str,
        changes: &MemoChanges,
        baseline: DateTime<Utc>,
    ) -> Result<Memo, StoreError> {
        let memo = {
            let _guard = self.write_lock.lock().await;

            let mut memo = self
                .backend
                .load(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

            if !memo.is_owned_by(owner) {
                return Err(StoreError::Unauthorized(id.to_string()));
            }

            if baseline < memo.client_updated_at {
                tracing::warn!(
                    "conflict on memo {}: stored {}, submitted {}",
                    id,
                    memo.client_updated_at.to_rfc3339(),
                    baseline.to_rfc3339()
                );
                return Err(StoreError::Conflict {
                    id: id.to_string(),
                    stored: memo.client_updated_at,
                    submitted: baseline,
                });
            }

            let now = self.clock.now().trunc_subsecs(3);
            memo.apply(changes);
            memo.updated_at = now;
            memo.client_updated_at = next_token(now, memo.client_updated_at, baseline);
            self.backend.save(&memo).await?;
            memo
        };

        tracing::debug!(
            "updated memo {}, token now {}",
            memo.id,
            memo.client_updated_at.to_rfc3339()
        );
        self.publish(MemoEvent::MemoUpdated(memo.clone()));
        Ok(memo)
    }

    /// Delete a memo. Unconditional for the owner.
    pub async fn delete(&self, id: &str, owner: &str) -> Result<(), StoreError> {
        {
            let _guard = self.write_lock.lock().await;

            let memo = self
                .backend
                .load(id)
                .await?
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

            if !memo.is_owned_by(owner) {
                return Err(StoreError::Unauthorized(id.to_string()));
            }

            self.backend.remove(id).await?;
        }

        tracing::info!("deleted memo {}", id);
        self.publish(MemoEvent::deleted(id));
        Ok(())
    }

    fn publish(&self, event: MemoEvent) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.publish(event);
        }
    }
}

/// New concurrency token: `now`, but strictly after both the previous token
/// and the accepted baseline. Tokens carry whole milliseconds so clients
/// holding millisecond timestamps can echo them back unchanged.
fn next_token(
    now: DateTime<Utc>,
    stored: DateTime<Utc>,
    baseline: DateTime<Utc>,
) -> DateTime<Utc> {
    let floor = stored.max(baseline) + Duration::milliseconds(1);
    now.max(floor).trunc_subsecs(3)
}
