use std::sync::Arc;

use chrono::{DateTime, Utc};
use confab_persist::ThreadStore;
use confab_types::{Message, MessageRole, MessageStatus, SessionConfig, SessionEvent};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, BackendEvent, ReplyBackend, ReplyRequest, ReplyUsage};
use crate::metrics::median;
use crate::registry::{CancelRegistry, Registration};
use crate::state::SessionState;
use crate::validator::{MarkdownRepair, Validator};

pub type EventSender = mpsc::Sender<SessionEvent>;

/// What the caller wants answered
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub thread_id: String,
    pub user_message: Message,
    /// Caller-chosen id for the reply; generated when absent
    pub reply_id: Option<String>,
    pub model: Option<String>,
}

impl SessionRequest {
    pub fn new(thread_id: impl Into<String>, user_message: Message) -> Self {
        Self {
            thread_id: thread_id.into(),
            user_message,
            reply_id: None,
            model: None,
        }
    }

    pub fn with_reply_id(mut self, reply_id: impl Into<String>) -> Self {
        self.reply_id = Some(reply_id.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// A running exchange.
///
/// `thread_id` is the thread the user message actually landed in, which
/// differs from the requested one when `created_new_thread` is set.
#[derive(Debug)]
pub struct SessionHandle {
    pub thread_id: String,
    pub reply_id: String,
    pub user_message_id: String,
    pub created_new_thread: bool,
    pub events: mpsc::Receiver<SessionEvent>,
    pub task: JoinHandle<SessionState>,
}

impl SessionHandle {
    /// Drain every event and wait for the terminal state
    pub async fn collect(mut self) -> (Vec<SessionEvent>, Option<SessionState>) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        (events, self.task.await.ok())
    }
}

/// Opens streaming sessions against a thread store
#[derive(Clone)]
pub struct SessionRunner {
    store: ThreadStore,
    backend: Arc<dyn ReplyBackend>,
    validator: Arc<dyn Validator>,
    registry: CancelRegistry,
    config: SessionConfig,
}

impl SessionRunner {
    pub fn new(store: ThreadStore, backend: Arc<dyn ReplyBackend>, config: SessionConfig) -> Self {
        Self::new_with_validator(store, backend, Arc::new(MarkdownRepair), config)
    }

    pub(crate) fn new_with_validator(
        store: ThreadStore,
        backend: Arc<dyn ReplyBackend>,
        validator: Arc<dyn Validator>,
        config: SessionConfig,
    ) -> Self {
        Self {
            store,
            backend,
            validator,
            registry: CancelRegistry::new(),
            config,
        }
    }

    /// Create a builder for fluent construction
    pub fn builder() -> crate::builder::SessionRunnerBuilder {
        crate::builder::SessionRunnerBuilder::new()
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    pub fn registry(&self) -> &CancelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Out-of-band cancel by reply id or user message id
    pub fn cancel(&self, thread_id: &str, message_id: &str) -> bool {
        let cancelled = self.registry.cancel(thread_id, message_id);
        if cancelled {
            tracing::info!(thread_id, message_id, "Cancel requested");
        }
        cancelled
    }

    /// Commit the user message and spawn the reply in the background
    pub async fn open(&self, request: SessionRequest) -> SessionHandle {
        let user_message_id = request.user_message.id.clone();
        let outcome = self
            .store
            .add_message(&request.thread_id, request.user_message)
            .await;
        let thread = outcome.thread;

        let reply_id = request
            .reply_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let model = request.model.or_else(|| self.backend.default_model());

        let token = CancellationToken::new();
        let registration = self.registry.register(
            &thread.id,
            &[reply_id.as_str(), user_message_id.as_str()],
            token.clone(),
        );
        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));

        let exchange = Exchange {
            thread_id: thread.id.clone(),
            reply_id: reply_id.clone(),
            model,
            system_prompt: thread.custom_prompt.clone(),
            history: thread.messages,
            started_at: Utc::now(),
            state: SessionState::Opened,
            token,
            registration,
            events: tx,
            store: self.store.clone(),
            backend: Arc::clone(&self.backend),
            validator: Arc::clone(&self.validator),
            config: self.config.clone(),
        };
        let task = tokio::spawn(exchange.run());

        SessionHandle {
            thread_id: thread.id,
            reply_id,
            user_message_id,
            created_new_thread: outcome.created_new_thread,
            events: rx,
            task,
        }
    }
}

enum Step {
    Cancelled,
    Item(Option<Result<BackendEvent, BackendError>>),
}

/// State owned by one spawned session task
struct Exchange {
    thread_id: String,
    reply_id: String,
    model: Option<String>,
    system_prompt: Option<String>,
    history: Vec<Message>,
    started_at: DateTime<Utc>,
    state: SessionState,
    token: CancellationToken,
    registration: Registration,
    events: EventSender,
    store: ThreadStore,
    backend: Arc<dyn ReplyBackend>,
    validator: Arc<dyn Validator>,
    config: SessionConfig,
}

impl Exchange {
    async fn run(mut self) -> SessionState {
        tracing::info!(thread_id = %self.thread_id, reply_id = %self.reply_id, "Session opened");
        self.emit(SessionEvent::Connected).await;

        let mut working = self.placeholder();
        let token = self.token.clone();
        let backend = Arc::clone(&self.backend);
        let request = ReplyRequest::new(
            self.thread_id.clone(),
            self.reply_id.clone(),
            std::mem::take(&mut self.history),
        )
        .with_model(self.model.clone())
        .with_system_prompt(self.system_prompt.clone());

        let generation = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = backend.generate(request, token.child_token()) => Some(result),
        };
        let mut stream = match generation {
            None => return self.finish_cancelled(working).await,
            Some(Err(e)) => return self.finish_failed(e).await,
            Some(Ok(stream)) => stream,
        };

        self.transition(SessionState::Streaming);
        let mut usage = None;

        loop {
            let step = tokio::select! {
                biased;
                _ = token.cancelled() => Step::Cancelled,
                item = stream.next() => Step::Item(item),
            };

            match step {
                Step::Cancelled => return self.finish_cancelled(working).await,
                Step::Item(None) => break,
                Step::Item(Some(Ok(BackendEvent::Snapshot(snapshot)))) => {
                    working = self.adopt(snapshot);
                    self.emit(SessionEvent::MessageUpdate(working.clone())).await;
                }
                Step::Item(Some(Ok(BackendEvent::Finished(reported)))) => {
                    usage = reported;
                    break;
                }
                Step::Item(Some(Err(e))) => return self.finish_failed(e).await,
            }
        }
        drop(stream);

        self.finish_completed(working, usage).await
    }

    fn placeholder(&self) -> Message {
        let mut message = Message::placeholder(self.reply_id.clone(), self.model.clone());
        message.timestamp = self.started_at;
        message
    }

    /// Force the exchange identity onto a backend snapshot
    fn adopt(&self, mut snapshot: Message) -> Message {
        snapshot.id = self.reply_id.clone();
        snapshot.role = MessageRole::Assistant;
        snapshot.status = Some(MessageStatus::Processing);
        snapshot.timestamp = self.started_at;
        if snapshot.model.is_none() {
            snapshot.model = self.model.clone();
        }
        snapshot
    }

    async fn finish_completed(&mut self, working: Message, usage: Option<ReplyUsage>) -> SessionState {
        let mut message = if self.config.validate {
            self.validator.validate(working.clone()).await
        } else {
            working.clone()
        };
        message.id = self.reply_id.clone();
        message.role = MessageRole::Assistant;

        // After this point cancel requests are refused, so a cancel either
        // shows up on the token now or never
        self.registration.release();
        if self.token.is_cancelled() {
            return self.finish_cancelled(working).await;
        }

        message.status = Some(MessageStatus::Completed);
        if let Some(usage) = usage {
            if usage.total_tokens.is_some() {
                message.total_tokens = usage.total_tokens;
            }
            if let Some(rate) = median(&usage.tokens_per_second_samples) {
                message.median_tokens_per_second = Some(rate);
            }
        }

        if !self.store.upsert_message(&self.thread_id, message.clone()).await {
            tracing::warn!(
                thread_id = %self.thread_id,
                reply_id = %self.reply_id,
                "Thread removed before the reply was committed"
            );
        }

        self.transition(SessionState::Completed);
        tracing::info!(
            thread_id = %self.thread_id,
            reply_id = %self.reply_id,
            total_tokens = ?message.total_tokens,
            "Session completed"
        );
        self.emit(SessionEvent::Completed(message)).await;
        self.state
    }

    async fn finish_cancelled(&mut self, working: Message) -> SessionState {
        self.registration.release();

        let mut partial = working;
        partial.set_status(MessageStatus::Cancelled);
        partial.cancel_tool_calls();

        if self.config.keep_cancelled_partial
            && !self.store.upsert_message(&self.thread_id, partial.clone()).await
        {
            tracing::warn!(thread_id = %self.thread_id, "Thread removed before the partial reply was stored");
        }

        self.transition(SessionState::Cancelled);
        tracing::info!(thread_id = %self.thread_id, reply_id = %self.reply_id, "Session cancelled");
        self.emit(SessionEvent::MessageUpdate(partial)).await;
        self.state
    }

    async fn finish_failed(&mut self, error: BackendError) -> SessionState {
        self.registration.release();

        let event = match error {
            BackendError::ModelNotLoaded { model_id, message } => {
                tracing::warn!(thread_id = %self.thread_id, model_id = %model_id, "Local model not loaded");
                self.transition(SessionState::ModelUnavailable);
                SessionEvent::LocalModelNotLoaded {
                    model_id,
                    error: message,
                }
            }
            BackendError::Failed(reason) => {
                tracing::error!(thread_id = %self.thread_id, reply_id = %self.reply_id, error = %reason, "Session failed");
                self.transition(SessionState::Errored);
                SessionEvent::Error { error: reason }
            }
        };

        self.emit(event).await;
        self.state
    }

    fn transition(&mut self, next: SessionState) {
        if let Err(e) = self.state.advance(next) {
            tracing::warn!(thread_id = %self.thread_id, error = %e, "Ignored session transition");
        }
    }

    async fn emit(&self, event: SessionEvent) {
        let name = event.name();
        if self.events.send(event).await.is_err() {
            tracing::debug!(
                thread_id = %self.thread_id,
                reply_id = %self.reply_id,
                event = name,
                "Event receiver dropped"
            );
        }
    }
}
