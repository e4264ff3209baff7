//! Client-side view of the memos one screen shows.
//!
//! Poll results and realtime events arrive in no particular order. Entries
//! are merged latest-wins on `(updated_at, client_updated_at)`, and a deleted
//! memo stays deleted even if an older poll result still lists it.

use super::error::SyncError;
use crate::events::MemoEvent;
use crate::memo::{ListScope, Memo, MemoId, MemoView};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange {
    Upserted(MemoId),
    Removed(MemoId),
    /// The selected memo is gone or no longer readable.
    SelectionCleared { id: MemoId, reason: String },
}

#[derive(Debug, Default)]
pub struct MemoCache {
    scope: ListScope,
    viewer: Option<String>,
    memos: HashMap<MemoId, Memo>,
    deleted: HashSet<MemoId>,
    selected: Option<MemoId>,
    selected_is_owner: bool,
}

impl MemoCache {
    pub fn new(scope: ListScope, viewer: Option<String>) -> Self {
        Self {
            scope,
            viewer,
            ..Default::default()
        }
    }

    pub fn scope(&self) -> ListScope {
        self.scope
    }

    pub fn get(&self, id: &str) -> Option<&Memo> {
        self.memos.get(id)
    }

    /// Cached memos, most recently updated first.
    pub fn memos(&self) -> Vec<&Memo> {
        let mut memos: Vec<&Memo> = self.memos.values().collect();
        memos.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        memos
    }

    pub fn len(&self) -> usize {
        self.memos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.memos.is_empty()
    }

    pub fn select(&mut self, id: impl Into<MemoId>) {
        self.selected = Some(id.into());
        self.selected_is_owner = false;
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected(&self) -> Option<&Memo> {
        self.selected.as_deref().and_then(|id| self.memos.get(id))
    }

    pub fn selected_is_owner(&self) -> bool {
        self.selected_is_owner
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.deleted.contains(id)
    }

    /// Fold one realtime event in.
    pub fn apply_event(&mut self, event: &MemoEvent) -> Vec<CacheChange> {
        match event {
            MemoEvent::MemoCreated(memo) | MemoEvent::MemoUpdated(memo) => {
                self.merge(memo.clone()).into_iter().collect()
            }
            MemoEvent::MemoDeleted(deleted) => self.remove(&deleted.id, true, "Memo was deleted"),
        }
    }

    /// Replace membership with a listing requested at `issued_at`.
    ///
    /// Unlisted entries updated after `issued_at` arrived through events the
    /// listing could not have seen, so they are kept.
    pub fn apply_list(
        &mut self,
        memos: Vec<Memo>,
        issued_at: DateTime<Utc>,
    ) -> Vec<CacheChange> {
        let listed: HashSet<MemoId> = memos.iter().map(|m| m.id.clone()).collect();

        let dropped: Vec<MemoId> = self
            .memos
            .values()
            .filter(|memo| {
                !listed.contains(&memo.id)
                    && memo.updated_at <= issued_at
                    && self.selected.as_deref() != Some(memo.id.as_str())
            })
            .map(|memo| memo.id.clone())
            .collect();

        let mut changes = Vec::new();
        for id in dropped {
            changes.extend(self.remove(&id, false, ""));
        }

        for memo in memos {
            changes.extend(self.merge(memo));
        }
        changes
    }

    /// Fold in the result of fetching the selected memo.
    pub fn apply_detail(
        &mut self,
        id: &str,
        result: Result<MemoView, SyncError>,
    ) -> Vec<CacheChange> {
        match result {
            Ok(view) => {
                if self.selected.as_deref() == Some(id) {
                    self.selected_is_owner = view.is_owner;
                }
                self.merge(view.memo).into_iter().collect()
            }
            Err(SyncError::NotFound(_)) => self.remove(id, true, "Memo not found"),
            Err(SyncError::Unauthorized(_)) => {
                self.remove(id, false, "Memo is no longer accessible")
            }
            Err(e) => {
                tracing::debug!("detail refresh of {} failed: {}", id, e);
                Vec::new()
            }
        }
    }

    fn merge(&mut self, memo: Memo) -> Option<CacheChange> {
        if self.deleted.contains(&memo.id) {
            return None;
        }

        if !self.scope.includes(&memo, self.viewer.as_deref()) {
            let selected = self.selected.as_deref() == Some(memo.id.as_str());
            if !selected || !memo.is_visible_to(self.viewer.as_deref()) {
                return self
                    .remove(&memo.id, false, "Memo is no longer accessible")
                    .into_iter()
                    .next();
            }
        }

        if let Some(current) = self.memos.get(&memo.id) {
            if current.freshness() >= memo.freshness() {
                return None;
            }
        }

        let id = memo.id.clone();
        self.memos.insert(id.clone(), memo);
        Some(CacheChange::Upserted(id))
    }

    fn remove(&mut self, id: &str, tombstone: bool, reason: &str) -> Vec<CacheChange> {
        if tombstone {
            self.deleted.insert(id.to_string());
        }

        let mut changes = Vec::new();
        if self.memos.remove(id).is_some() {
            changes.push(CacheChange::Removed(id.to_string()));
        }
        if self.selected.as_deref() == Some(id) {
            self.selected = None;
            self.selected_is_owner = false;
            changes.push(CacheChange::SelectionCleared {
                id: id.to_string(),
                reason: reason.to_string(),
            });
        }
        changes
    }
}
