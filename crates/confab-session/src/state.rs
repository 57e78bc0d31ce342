use serde::{Deserialize, Serialize};

use crate::error::{Result, SessionError};

/// Lifecycle of one exchange.
///
/// `Opened → Streaming → {Completed | Cancelled | Errored | ModelUnavailable}`.
/// Any state may also jump straight to a terminal one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Opened,
    Streaming,
    Completed,
    Cancelled,
    Errored,
    ModelUnavailable,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed
                | SessionState::Cancelled
                | SessionState::Errored
                | SessionState::ModelUnavailable
        )
    }

    /// Move to `next`, rejecting any move out of a terminal state
    pub fn advance(&mut self, next: SessionState) -> Result<()> {
        let allowed = match (*self, next) {
            (from, _) if from.is_terminal() => false,
            (SessionState::Opened, SessionState::Streaming) => true,
            (SessionState::Streaming, SessionState::Streaming) => true,
            (_, to) => to.is_terminal(),
        };

        if !allowed {
            return Err(SessionError::InvalidTransition { from: *self, to: next });
        }
        *self = next;
        Ok(())
    }
}
