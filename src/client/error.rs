use crate::store::StoreError;

/// Errors surfaced to sync client callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The edit's baseline is stale; someone else wrote the memo first.
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("memo not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// The server refused the request as malformed.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Network or server failure unrelated to the memo itself.
    #[error("transport error: {0}")]
    Transport(String),
    #[error("realtime connection is not open")]
    NotConnected,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("update queue is closed")]
    QueueClosed,
}

impl SyncError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, SyncError::Conflict(_))
    }

    /// Transient failures are retried implicitly by the next poll.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::Transport(_) | SyncError::NotConnected)
    }

    /// Text suitable for showing to the person editing.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::Conflict(_) => {
                "Someone else updated this memo. Reload to see the latest version.".to_string()
            }
            SyncError::NotFound(_) => "Memo not found".to_string(),
            SyncError::Unauthorized(_) => "You are not allowed to change this memo".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict { .. } => SyncError::Conflict(e.to_string()),
            StoreError::NotFound(id) => SyncError::NotFound(id),
            StoreError::Unauthorized(id) => SyncError::Unauthorized(id),
            StoreError::InvalidInput(msg) => SyncError::Rejected(msg),
            StoreError::Backend(msg) => SyncError::Transport(msg),
        }
    }
}
