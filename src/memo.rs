//! Memo data model shared by the server store and the sync client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque memo identifier.
pub type MemoId = String;

/// Opaque user identifier (the session's subject).
pub type UserId = String;

/// A memo as stored and as sent over the wire.
///
/// `client_updated_at` is the optimistic-concurrency token: it is stamped by the
/// store on every successful write and echoed back by clients as the baseline
/// of their next edit. It is distinct from `updated_at`, which only records
/// when the row last changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memo {
    pub id: MemoId,
    pub title: String,
    pub content: Option<String>,
    pub is_public: bool,
    pub author_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub client_updated_at: DateTime<Utc>,
}

impl Memo {
    /// Whether `viewer` may read this memo.
    pub fn is_visible_to(&self, viewer: Option<&str>) -> bool {
        self.is_public || viewer == Some(self.author_id.as_str())
    }

    pub fn is_owned_by(&self, user: &str) -> bool {
        self.author_id == user
    }

    /// Ordering key for latest-wins reconciliation between two copies of
    /// the same memo. Arrival order is never used.
    pub fn freshness(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (self.updated_at, self.client_updated_at)
    }

    /// Apply a partial change set. Absent fields keep their stored value.
    pub fn apply(&mut self, changes: &MemoChanges) {
        if let Some(title) = &changes.title {
            self.title = title.clone();
        }
        if let Some(content) = &changes.content {
            self.content = Some(content.clone());
        }
        if let Some(is_public) = changes.is_public {
            self.is_public = is_public;
        }
    }
}

/// Partial field changes for an update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoChanges {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_public: Option<bool>,
}

impl MemoChanges {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    pub fn content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none() && self.content.is_none() && self.is_public.is_none()
    }

    /// Fold `later` on top of `self`; fields set in `later` win.
    pub fn merge(&mut self, later: MemoChanges) {
        if later.title.is_some() {
            self.title = later.title;
        }
        if later.content.is_some() {
            self.content = later.content;
        }
        if later.is_public.is_some() {
            self.is_public = later.is_public;
        }
    }
}

/// Body of `PUT /memo/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateMemoRequest {
    #[serde(flatten)]
    pub changes: MemoChanges,
    pub client_updated_at: DateTime<Utc>,
}

/// Body of `POST /memo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMemo {
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

/// Response of `GET /memo/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoView {
    pub memo: Memo,
    pub is_owner: bool,
}

/// Listing scope for `GET /memo?scope=`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListScope {
    #[default]
    Public,
    Private,
    All,
}

impl ListScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListScope::Public => "public",
            ListScope::Private => "private",
            ListScope::All => "all",
        }
    }

    /// Whether `memo` belongs in this scope for `viewer`.
    ///
    /// Without a viewer every scope degrades to `Public`.
    pub fn includes(&self, memo: &Memo, viewer: Option<&str>) -> bool {
        let owned = viewer.is_some_and(|v| memo.is_owned_by(v));
        match (self, viewer) {
            (_, None) | (ListScope::Public, _) => memo.is_public,
            (ListScope::Private, Some(_)) => owned && !memo.is_public,
            (ListScope::All, Some(_)) => memo.is_public || owned,
        }
    }
}

impl fmt::Display for ListScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ListScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(ListScope::Public),
            "private" => Ok(ListScope::Private),
            "all" => Ok(ListScope::All),
            other => Err(format!("unknown scope: {}", other)),
        }
    }
}
