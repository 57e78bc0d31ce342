use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use confab_types::{Thread, ThreadListItem, ThreadPatch};
use serde::Deserialize;
use std::sync::Arc;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Default, Deserialize)]
pub struct CreateThreadRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// Create a new thread
pub async fn create_thread(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateThreadRequest>,
) -> (StatusCode, Json<Thread>) {
    let name = req.name.filter(|n| !n.trim().is_empty());
    let thread = state.store.create_thread(name).await;

    (StatusCode::CREATED, Json(thread))
}

/// List threads, most recently updated first
pub async fn list_threads(State(state): State<Arc<AppState>>) -> Json<Vec<ThreadListItem>> {
    Json(state.store.get_thread_list().await)
}

pub async fn most_recent_thread(State(state): State<Arc<AppState>>) -> ApiResult<Json<Thread>> {
    state
        .store
        .get_most_recent_thread()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::ThreadNotFound("no threads".to_string()))
}

pub async fn get_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Thread>> {
    state
        .store
        .get_thread(&thread_id)
        .await
        .map(Json)
        .ok_or(ApiError::ThreadNotFound(thread_id))
}

pub async fn delete_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.store.delete_thread(&thread_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::ThreadNotFound(thread_id))
    }
}

/// Rename a thread and/or set its prompt or summary.
///
/// Fields left out are untouched; `null` clears the prompt or summary.
pub async fn update_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Json(patch): Json<ThreadPatch>,
) -> ApiResult<Json<Thread>> {
    if patch.is_empty() {
        return Err(ApiError::BadRequest("Nothing to update".to_string()));
    }

    state
        .store
        .update_thread_fields(&thread_id, patch)
        .await
        .map(Json)
        .ok_or(ApiError::ThreadNotFound(thread_id))
}

/// Remove every message but keep the thread
pub async fn clear_thread(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> ApiResult<StatusCode> {
    if state.store.clear_thread(&thread_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::ThreadNotFound(thread_id))
    }
}
