//! Client view of the memo HTTP API.

use super::error::SyncError;
use crate::api::MessageBody;
use crate::auth::USER_HEADER;
use crate::memo::{ListScope, Memo, MemoView, NewMemo, UpdateMemoRequest};
use crate::store::MemoStore;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;

/// The CRUD surface the sync core talks to.
#[async_trait]
pub trait MemoApi: Send + Sync {
    async fn list(&self, scope: ListScope) -> Result<Vec<Memo>, SyncError>;
    async fn get(&self, id: &str) -> Result<MemoView, SyncError>;
    async fn create(&self, new: &NewMemo) -> Result<Memo, SyncError>;
    async fn update(&self, id: &str, request: &UpdateMemoRequest) -> Result<Memo, SyncError>;
    async fn delete(&self, id: &str) -> Result<(), SyncError>;
}

/// `MemoApi` over HTTP.
pub struct HttpMemoApi {
    client: Client,
    base_url: String,
    user: Option<String>,
}

impl HttpMemoApi {
    pub fn new(base_url: impl Into<String>, user: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            user,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.user {
            Some(user) => request.header(USER_HEADER, user),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, id: &str) -> Result<Response, SyncError> {
        let resp = self
            .authed(request)
            .send()
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let message = resp
            .json::<MessageBody>()
            .await
            .map(|body| body.message)
            .unwrap_or_else(|_| status.to_string());

        Err(match status {
            StatusCode::CONFLICT => SyncError::Conflict(message),
            StatusCode::NOT_FOUND => SyncError::NotFound(id.to_string()),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::Unauthorized(message),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
                SyncError::Rejected(message)
            }
            _ => SyncError::Transport(format!("HTTP {}: {}", status, message)),
        })
    }

    async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, SyncError> {
        resp.json::<T>()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MemoApi for HttpMemoApi {
    async fn list(&self, scope: ListScope) -> Result<Vec<Memo>, SyncError> {
        let request = self
            .client
            .get(self.url("/memo"))
            .query(&[("scope", scope.as_str())]);
        Self::decode(self.send(request, "").await?).await
    }

    async fn get(&self, id: &str) -> Result<MemoView, SyncError> {
        let request = self.client.get(self.url(&memo_path(id)));
        Self::decode(self.send(request, id).await?).await
    }

    async fn create(&self, new: &NewMemo) -> Result<Memo, SyncError> {
        let request = self.client.post(self.url("/memo")).json(new);
        Self::decode(self.send(request, "").await?).await
    }

    async fn update(&self, id: &str, request: &UpdateMemoRequest) -> Result<Memo, SyncError> {
        let request = self
            .client
            .put(self.url(&memo_path(id)))
            .json(request);
        Self::decode(self.send(request, id).await?).await
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        let request = self.client.delete(self.url(&memo_path(id)));
        self.send(request, id).await?;
        Ok(())
    }
}

fn memo_path(id: &str) -> String {
    format!("/memo/{}", urlencoding::encode(id))
}

/// `MemoApi` calling a store in the same process, acting as one user.
pub struct LocalMemoApi {
    store: Arc<MemoStore>,
    user: Option<String>,
}

impl LocalMemoApi {
    pub fn new(store: Arc<MemoStore>, user: Option<String>) -> Self {
        Self { store, user }
    }

    fn require_user(&self) -> Result<&str, SyncError> {
        self.user
            .as_deref()
            .ok_or_else(|| SyncError::Unauthorized("Authentication required".to_string()))
    }
}

#[async_trait]
impl MemoApi for LocalMemoApi {
    async fn list(&self, scope: ListScope) -> Result<Vec<Memo>, SyncError> {
        Ok(self.store.list(scope, self.user.as_deref()).await?)
    }

    async fn get(&self, id: &str) -> Result<MemoView, SyncError> {
        Ok(self.store.get(id, self.user.as_deref()).await?)
    }

    async fn create(&self, new: &NewMemo) -> Result<Memo, SyncError> {
        let user = self.require_user()?;
        Ok(self.store.create(user, new.clone()).await?)
    }

    async fn update(&self, id: &str, request: &UpdateMemoRequest) -> Result<Memo, SyncError> {
        let user = self.require_user()?;
        Ok(self
            .store
            .update(id, user, &request.changes, request.client_updated_at)
            .await?)
    }

    async fn delete(&self, id: &str) -> Result<(), SyncError> {
        let user = self.require_user()?;
        Ok(self.store.delete(id, user).await?)
    }
}
