use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkspaceRequest {
    pub workspace_root: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceResponse {
    pub workspace_root: String,
    pub thread_count: usize,
}

pub async fn get_workspace(State(state): State<Arc<AppState>>) -> Json<WorkspaceResponse> {
    Json(WorkspaceResponse {
        workspace_root: state.store.workspace_root().await.display().to_string(),
        thread_count: state.store.thread_count().await,
    })
}

/// Point the store at another workspace.
///
/// Pending writes for the current workspace are flushed first; the switch
/// itself never writes.
pub async fn update_workspace(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UpdateWorkspaceRequest>,
) -> ApiResult<Json<WorkspaceResponse>> {
    if req.workspace_root.as_os_str().is_empty() {
        return Err(ApiError::BadRequest("workspaceRoot must not be empty".to_string()));
    }

    state.store.flush().await?;
    state.store.update_workspace_root(req.workspace_root).await;

    Ok(get_workspace(State(state)).await)
}
