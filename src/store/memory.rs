use super::{MemoBackend, StoreError};
use crate::memo::{Memo, MemoId};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Volatile backend; contents are lost on restart.
#[derive(Default)]
pub struct MemoryBackend {
    memos: RwLock<HashMap<MemoId, Memo>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MemoBackend for MemoryBackend {
    async fn load(&self, id: &str) -> Result<Option<Memo>, StoreError> {
        Ok(self.memos.read().await.get(id).cloned())
    }

    async fn save(&self, memo: &Memo) -> Result<(), StoreError> {
        self.memos
            .write()
            .await
            .insert(memo.id.clone(), memo.clone());
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.memos.write().await.remove(id).is_some())
    }

    async fn load_all(&self) -> Result<Vec<Memo>, StoreError> {
        Ok(self.memos.read().await.values().cloned().collect())
    }
}
