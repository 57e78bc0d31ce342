use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Lifecycle of an assistant reply.
///
/// `Processing` is the only non-terminal status; once a message is
/// `Completed` or `Cancelled` it never goes back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Processing,
    Completed,
    Cancelled,
}

impl MessageStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, MessageStatus::Processing)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ToolCallStatus {
    pub fn is_finished(self) -> bool {
        matches!(
            self,
            ToolCallStatus::Completed | ToolCallStatus::Failed | ToolCallStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolCallStatus>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            status: Some(ToolCallStatus::Pending),
        }
    }

    pub fn with_status(mut self, status: ToolCallStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub tool_call_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub is_error: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAttachment {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

/// One turn in a thread
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub content: String,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median_tokens_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageAttachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            status: None,
            tool_calls: None,
            tool_results: None,
            model: None,
            median_tokens_per_second: None,
            total_tokens: None,
            citations: None,
            images: None,
            notes: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// Empty assistant reply that a streaming session fills in
    pub fn placeholder(id: impl Into<String>, model: Option<String>) -> Self {
        let mut message = Self::assistant("").with_id(id);
        message.status = Some(MessageStatus::Processing);
        message.model = model;
        message
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = Some(tool_calls);
        self
    }

    pub fn is_user(&self) -> bool {
        self.role == MessageRole::User
    }

    pub fn is_assistant(&self) -> bool {
        self.role == MessageRole::Assistant
    }

    pub fn is_processing(&self) -> bool {
        self.status == Some(MessageStatus::Processing)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_some_and(MessageStatus::is_terminal)
    }

    /// Tool calls that have not reached a finished status yet
    pub fn has_running_tool_calls(&self) -> bool {
        self.tool_calls.as_ref().is_some_and(|calls| {
            calls
                .iter()
                .any(|call| !call.status.is_some_and(ToolCallStatus::is_finished))
        })
    }

    /// Set the status, refusing to leave a terminal status.
    ///
    /// Returns `false` when the transition was rejected.
    pub fn set_status(&mut self, status: MessageStatus) -> bool {
        if self.is_terminal() && self.status != Some(status) {
            return false;
        }
        self.status = Some(status);
        true
    }

    /// Mark unfinished tool calls as cancelled
    pub fn cancel_tool_calls(&mut self) {
        if let Some(calls) = self.tool_calls.as_mut() {
            for call in calls.iter_mut() {
                if !call.status.is_some_and(ToolCallStatus::is_finished) {
                    call.status = Some(ToolCallStatus::Cancelled);
                }
            }
        }
    }
}

/// Partial update applied by `update_message`.
///
/// Only the fields that are `Some` are written. `id` and `role` are fixed for
/// the lifetime of a message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MessageStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<Vec<ToolResult>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub median_tokens_per_second: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<Citation>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageAttachment>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl MessagePatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn status(mut self, status: MessageStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply_to(self, message: &mut Message) {
        if let Some(content) = self.content {
            message.content = content;
        }
        if let Some(status) = self.status {
            // a rejected transition leaves the terminal status in place
            message.set_status(status);
        }
        if let Some(tool_calls) = self.tool_calls {
            message.tool_calls = Some(tool_calls);
        }
        if let Some(tool_results) = self.tool_results {
            message.tool_results = Some(tool_results);
        }
        if let Some(model) = self.model {
            message.model = Some(model);
        }
        if let Some(rate) = self.median_tokens_per_second {
            message.median_tokens_per_second = Some(rate);
        }
        if let Some(total) = self.total_tokens {
            message.total_tokens = Some(total);
        }
        if let Some(citations) = self.citations {
            message.citations = Some(citations);
        }
        if let Some(images) = self.images {
            message.images = Some(images);
        }
        if let Some(notes) = self.notes {
            message.notes = Some(notes);
        }
    }
}

impl From<Message> for MessagePatch {
    fn from(message: Message) -> Self {
        Self {
            content: Some(message.content),
            status: message.status,
            tool_calls: message.tool_calls,
            tool_results: message.tool_results,
            model: message.model,
            median_tokens_per_second: message.median_tokens_per_second,
            total_tokens: message.total_tokens,
            citations: message.citations,
            images: message.images,
            notes: message.notes,
        }
    }
}
