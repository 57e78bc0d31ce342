use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use confab_persist::{AddMessageOutcome, CascadeDeletion};
use confab_types::{Message, MessagePatch, MessageRole};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct NewMessageRequest {
    /// Client-generated id; a fresh one is assigned when absent
    #[serde(default)]
    pub id: Option<String>,
    pub role: MessageRole,
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl From<NewMessageRequest> for Message {
    fn from(req: NewMessageRequest) -> Self {
        let mut message = Message::new(req.role, req.content);
        if let Some(id) = req.id.filter(|id| !id.is_empty()) {
            message.id = id;
        }
        message.model = req.model;
        message
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> ApiResult<Json<Vec<Message>>> {
    state
        .store
        .get_thread_messages(&thread_id)
        .await
        .map(Json)
        .ok_or(ApiError::ThreadNotFound(thread_id))
}

/// Append a message; an unknown thread id starts a new thread
pub async fn add_message(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Json(req): Json<NewMessageRequest>,
) -> (StatusCode, Json<AddMessageOutcome>) {
    let outcome = state.store.add_message(&thread_id, req.into()).await;
    (StatusCode::CREATED, Json(outcome))
}

pub async fn update_message(
    State(state): State<Arc<AppState>>,
    Path((thread_id, message_id)): Path<(String, String)>,
    Json(patch): Json<MessagePatch>,
) -> ApiResult<Json<Message>> {
    if patch.is_empty() {
        return Err(ApiError::BadRequest("Nothing to update".to_string()));
    }
    if !state.store.update_message(&thread_id, &message_id, patch).await {
        return Err(ApiError::MessageNotFound(message_id));
    }

    state
        .store
        .get_thread(&thread_id)
        .await
        .and_then(|thread| thread.message(&message_id).cloned())
        .map(Json)
        .ok_or(ApiError::MessageNotFound(message_id))
}

pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Path((thread_id, message_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if state.store.delete_message(&thread_id, &message_id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::MessageNotFound(message_id))
    }
}

/// Delete a message wherever it appears, taking a user message's reply with it
pub async fn delete_message_everywhere(
    State(state): State<Arc<AppState>>,
    Path(message_id): Path<String>,
) -> Json<CascadeDeletion> {
    Json(state.store.delete_message_from_all_threads(&message_id).await)
}

/// Cancel an in-flight reply by reply id or user message id
pub async fn cancel_message(
    State(state): State<Arc<AppState>>,
    Path((thread_id, message_id)): Path<(String, String)>,
) -> Json<CancelResponse> {
    Json(CancelResponse {
        success: state.sessions.cancel(&thread_id, &message_id),
    })
}
