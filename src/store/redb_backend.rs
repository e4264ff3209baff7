//! redb-backed persistence: one table of memo id -> JSON row.

use super::{MemoBackend, StoreError};
use crate::memo::Memo;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;

const MEMOS: TableDefinition<&str, &str> = TableDefinition::new("memos");

pub struct RedbBackend {
    db: Database,
}

fn backend_err(e: impl Into<redb::Error>) -> StoreError {
    StoreError::Backend(e.into().to_string())
}

fn decode(id: &str, json: &str) -> Result<Memo, StoreError> {
    serde_json::from_str(json)
        .map_err(|e| StoreError::Backend(format!("corrupt row {}: {}", id, e)))
}

impl RedbBackend {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(backend_err)?;

        // Make sure the table exists so read transactions can open it
        let txn = db.begin_write().map_err(backend_err)?;
        txn.open_table(MEMOS).map_err(backend_err)?;
        txn.commit().map_err(backend_err)?;

        tracing::info!("opened memo database at {:?}", path.as_ref());
        Ok(Self { db })
    }
}

#[async_trait]
impl MemoBackend for RedbBackend {
    async fn load(&self, id: &str) -> Result<Option<Memo>, StoreError> {
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = txn.open_table(MEMOS).map_err(backend_err)?;
        let row = table.get(id).map_err(backend_err)?;
        row.map(|guard| decode(id, guard.value())).transpose()
    }

    async fn save(&self, memo: &Memo) -> Result<(), StoreError> {
        let json = serde_json::to_string(memo).map_err(|e| StoreError::Backend(e.to_string()))?;
        let txn = self.db.begin_write().map_err(backend_err)?;
        {
            let mut table = txn.open_table(MEMOS).map_err(backend_err)?;
            table
                .insert(memo.id.as_str(), json.as_str())
                .map_err(backend_err)?;
        }
        txn.commit().map_err(backend_err)?;
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<bool, StoreError> {
        let txn = self.db.begin_write().map_err(backend_err)?;
        let removed = {
            let mut table = txn.open_table(MEMOS).map_err(backend_err)?;
            let existed = table.remove(id).map_err(backend_err)?.is_some();
            existed
        };
        txn.commit().map_err(backend_err)?;
        Ok(removed)
    }

    async fn load_all(&self) -> Result<Vec<Memo>, StoreError> {
        let txn = self.db.begin_read().map_err(backend_err)?;
        let table = txn.open_table(MEMOS).map_err(backend_err)?;
        let mut memos = Vec::new();
        for entry in table.iter().map_err(backend_err)? {
            let (key, value) = entry.map_err(backend_err)?;
            memos.push(decode(key.value(), value.value())?);
        }
        Ok(memos)
    }
}
