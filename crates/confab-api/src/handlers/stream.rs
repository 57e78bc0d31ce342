use axum::{
    extract::{Path, State},
    http::{HeaderName, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use confab_session::SessionRequest;
use confab_types::{Message, SessionEvent};
use futures::stream::StreamExt;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub const THREAD_ID_HEADER: &str = "x-confab-thread-id";
pub const REPLY_ID_HEADER: &str = "x-confab-reply-id";
pub const USER_MESSAGE_ID_HEADER: &str = "x-confab-user-message-id";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub content: String,
    /// Id for the user message; generated when absent
    #[serde(default)]
    pub message_id: Option<String>,
    /// Id the reply will carry; generated when absent
    #[serde(default)]
    pub reply_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

impl ChatRequest {
    fn into_session_request(self, thread_id: String) -> SessionRequest {
        let mut user_message = Message::user(self.content);
        if let Some(id) = self.message_id.filter(|id| !id.is_empty()) {
            user_message.id = id;
        }

        let mut request = SessionRequest::new(thread_id, user_message);
        if let Some(reply_id) = self.reply_id.filter(|id| !id.is_empty()) {
            request = request.with_reply_id(reply_id);
        }
        if let Some(model) = self.model.filter(|m| !m.is_empty()) {
            request = request.with_model(model);
        }
        request
    }
}

fn to_sse(event: SessionEvent) -> Event {
    Event::default()
        .event(event.name())
        .json_data(event.data())
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

fn header_value(value: &str) -> ApiResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|_| ApiError::BadRequest(format!("Id is not a valid header value: {}", value)))
}

/// Send a user message and stream the reply using Server-Sent Events.
///
/// The ids needed to cancel the exchange come back as response headers.
/// The session keeps running and commits its reply if the client goes away.
pub async fn chat_stream(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> ApiResult<Response> {
    if req.content.trim().is_empty() {
        return Err(ApiError::BadRequest("content must not be empty".to_string()));
    }
    for id in [&req.message_id, &req.reply_id].into_iter().flatten() {
        header_value(id)?;
    }

    let handle = state
        .sessions
        .open(req.into_session_request(thread_id))
        .await;

    let headers = [
        (HeaderName::from_static(THREAD_ID_HEADER), header_value(&handle.thread_id)?),
        (HeaderName::from_static(REPLY_ID_HEADER), header_value(&handle.reply_id)?),
        (
            HeaderName::from_static(USER_MESSAGE_ID_HEADER),
            header_value(&handle.user_message_id)?,
        ),
    ];

    let sse_stream = ReceiverStream::new(handle.events).map(|event| Ok::<Event, Infallible>(to_sse(event)));

    Ok((headers, Sse::new(sse_stream).keep_alive(KeepAlive::default())).into_response())
}
