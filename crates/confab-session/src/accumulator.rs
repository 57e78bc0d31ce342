use confab_types::{Message, SessionEvent};

/// How an exchange ended, as seen by a client
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    Completed,
    Cancelled,
    Failed(String),
    ModelNotLoaded { model_id: String, error: String },
}

/// Client-side reducer over a session's event stream.
///
/// Every update replaces the message with the same id. Once a terminal event
/// arrives it is authoritative and later snapshots are dropped.
#[derive(Debug, Default)]
pub struct ReplyAccumulator {
    connected: bool,
    messages: Vec<Message>,
    outcome: Option<ReplyOutcome>,
}

impl ReplyAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns `true` when the visible state changed.
    pub fn apply(&mut self, event: SessionEvent) -> bool {
        if self.outcome.is_some() {
            tracing::debug!(event = event.name(), "Ignoring event after terminal state");
            return false;
        }

        match event {
            SessionEvent::Connected => {
                let changed = !self.connected;
                self.connected = true;
                changed
            }
            SessionEvent::MessageUpdate(message) => {
                if message.is_terminal() {
                    self.outcome = Some(ReplyOutcome::Cancelled);
                }
                self.replace(message);
                true
            }
            SessionEvent::Completed(message) => {
                self.outcome = Some(ReplyOutcome::Completed);
                self.replace(message);
                true
            }
            SessionEvent::Error { error } => {
                self.outcome = Some(ReplyOutcome::Failed(error));
                true
            }
            SessionEvent::LocalModelNotLoaded { model_id, error } => {
                self.outcome = Some(ReplyOutcome::ModelNotLoaded { model_id, error });
                true
            }
        }
    }

    fn replace(&mut self, message: Message) {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => self.messages.push(message),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_finished(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn outcome(&self) -> Option<&ReplyOutcome> {
        self.outcome.as_ref()
    }

    /// Latest state of the reply (the most recently started message)
    pub fn reply(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }
}
