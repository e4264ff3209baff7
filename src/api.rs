use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::auth::Viewer;
use crate::memo::{ListScope, Memo, MemoView, NewMemo, UpdateMemoRequest};
use crate::store::{MemoStore, StoreError};

/// Message returned with 409 responses. Clients match on the "Conflict" prefix.
pub const CONFLICT_MESSAGE: &str = "Conflict: Memo has been updated by someone else.";

#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<MemoStore>,
}

pub fn router(store: Arc<MemoStore>) -> Router {
    let state = ApiState { store };

    Router::new()
        .route("/memo", get(list_memos).post(create_memo))
        .route(
            "/memo/:id",
            get(get_memo).put(update_memo).delete(delete_memo),
        )
        .with_state(state)
}

#[derive(Serialize, Deserialize)]
pub struct MessageBody {
    pub message: String,
}

/// HTTP-facing error.
#[derive(Debug)]
pub enum ApiError {
    AuthenticationRequired,
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Store(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::AuthenticationRequired => (
                StatusCode::UNAUTHORIZED,
                "Authentication required".to_string(),
            ),
            ApiError::Store(StoreError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, "Memo not found".to_string())
            }
            ApiError::Store(StoreError::Unauthorized(_)) => {
                (StatusCode::FORBIDDEN, "Unauthorized".to_string())
            }
            ApiError::Store(StoreError::Conflict { .. }) => {
                (StatusCode::CONFLICT, CONFLICT_MESSAGE.to_string())
            }
            ApiError::Store(StoreError::InvalidInput(msg)) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Store(e @ StoreError::Backend(_)) => {
                tracing::error!("store failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(MessageBody { message })).into_response()
    }
}

fn require_user(viewer: &Viewer) -> Result<&str, ApiError> {
    viewer.id().ok_or(ApiError::AuthenticationRequired)
}

#[derive(Deserialize)]
struct ListQuery {
    scope: Option<String>,
}

impl ListQuery {
    /// Unknown or missing scopes fall back to `public`.
    fn scope(&self) -> ListScope {
        self.scope
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or_default()
    }
}

async fn list_memos(
    State(state): State<ApiState>,
    viewer: Viewer,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Memo>>, ApiError> {
    let memos = state.store.list(query.scope(), viewer.id()).await?;
    Ok(Json(memos))
}

async fn create_memo(
    State(state): State<ApiState>,
    viewer: Viewer,
    Json(body): Json<NewMemo>,
) -> Result<(StatusCode, Json<Memo>), ApiError> {
    let user = require_user(&viewer)?;
    let memo = state.store.create(user, body).await?;
    Ok((StatusCode::CREATED, Json(memo)))
}

async fn get_memo(
    State(state): State<ApiState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Json<MemoView>, ApiError> {
    let view = state.store.get(&id, viewer.id()).await?;
    Ok(Json(view))
}

async fn update_memo(
    State(state): State<ApiState>,
    viewer: Viewer,
    Path(id): Path<String>,
    Json(body): Json<UpdateMemoRequest>,
) -> Result<Json<Memo>, ApiError> {
    let user = require_user(&viewer)?;
    let memo = state
        .store
        .update(&id, user, &body.changes, body.client_updated_at)
        .await?;
    Ok(Json(memo))
}

async fn delete_memo(
    State(state): State<ApiState>,
    viewer: Viewer,
    Path(id): Path<String>,
) -> Result<Json<MessageBody>, ApiError> {
    let user = require_user(&viewer)?;
    state.store.delete(&id, user).await?;
    Ok(Json(MessageBody {
        message: "Memo deleted successfully".to_string(),
    }))
}
