use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Events carried on the one-way channel of a streaming session.
///
/// Ordering contract for one exchange:
///
/// Connected → MessageUpdate* → (Completed | Error | LocalModelNotLoaded
///                               | MessageUpdate{status: cancelled})
///
/// Updates are full snapshots; a later one for the same message id replaces
/// every earlier one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum SessionEvent {
    /// Channel established
    Connected,

    /// Latest state of the in-flight assistant message
    MessageUpdate(Message),

    /// Terminal success; metrics ride on the message itself
    Completed(Message),

    /// Terminal failure
    Error { error: String },

    /// Terminal, recoverable by loading the model and retrying
    #[serde(rename_all = "camelCase")]
    LocalModelNotLoaded { model_id: String, error: String },
}

impl SessionEvent {
    /// Wire name used as the SSE `event:` field
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Connected => "connected",
            SessionEvent::MessageUpdate(_) => "message-update",
            SessionEvent::Completed(_) => "completed",
            SessionEvent::Error { .. } => "error",
            SessionEvent::LocalModelNotLoaded { .. } => "local-model-not-loaded",
        }
    }

    /// Wire payload used as the SSE `data:` field
    pub fn data(&self) -> serde_json::Value {
        match self {
            SessionEvent::Connected => serde_json::json!({}),
            SessionEvent::MessageUpdate(message) | SessionEvent::Completed(message) => {
                serde_json::to_value(message).unwrap_or(serde_json::Value::Null)
            }
            SessionEvent::Error { error } => serde_json::json!({ "error": error }),
            SessionEvent::LocalModelNotLoaded { model_id, error } => {
                serde_json::json!({ "modelId": model_id, "error": error })
            }
        }
    }

    pub fn message(&self) -> Option<&Message> {
        match self {
            SessionEvent::MessageUpdate(message) | SessionEvent::Completed(message) => {
                Some(message)
            }
            _ => None,
        }
    }

    /// Whether this event ends the exchange.
    ///
    /// A cancelled reply is delivered as an update carrying the terminal
    /// status, so updates count as terminal when their message is.
    pub fn is_terminal(&self) -> bool {
        match self {
            SessionEvent::Connected => false,
            SessionEvent::MessageUpdate(message) => message.is_terminal(),
            SessionEvent::Completed(_)
            | SessionEvent::Error { .. }
            | SessionEvent::LocalModelNotLoaded { .. } => true,
        }
    }
}
