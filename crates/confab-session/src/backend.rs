use std::pin::Pin;

use async_trait::async_trait;
use confab_types::Message;
use futures::Stream;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Input handed to a [`ReplyBackend`] for one exchange
#[derive(Debug, Clone)]
pub struct ReplyRequest {
    pub thread_id: String,
    /// Id the reply will carry in every event
    pub reply_id: String,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    /// Thread history, ending with the user message being answered
    pub history: Vec<Message>,
}

impl ReplyRequest {
    pub fn new(thread_id: impl Into<String>, reply_id: impl Into<String>, history: Vec<Message>) -> Self {
        Self {
            thread_id: thread_id.into(),
            reply_id: reply_id.into(),
            model: None,
            system_prompt: None,
            history,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_system_prompt(mut self, prompt: Option<String>) -> Self {
        self.system_prompt = prompt;
        self
    }
}

/// Token accounting reported when a reply finishes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReplyUsage {
    pub total_tokens: Option<u64>,
    /// Instantaneous throughput measurements taken while streaming
    pub tokens_per_second_samples: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    /// Full current state of the reply
    Snapshot(Message),
    /// Generation ended normally
    Finished(Option<ReplyUsage>),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("Model {model_id} is not loaded: {message}")]
    ModelNotLoaded { model_id: String, message: String },

    #[error("{0}")]
    Failed(String),
}

pub type ReplyStream = Pin<Box<dyn Stream<Item = Result<BackendEvent, BackendError>> + Send>>;

/// Producer of assistant replies.
///
/// Implementations should watch `cancel` and stop work (including running
/// tools) once it fires; the session stops reading either way.
#[async_trait]
pub trait ReplyBackend: Send + Sync {
    async fn generate(
        &self,
        request: ReplyRequest,
        cancel: CancellationToken,
    ) -> Result<ReplyStream, BackendError>;

    /// Model used when the request does not name one
    fn default_model(&self) -> Option<String> {
        None
    }
}
