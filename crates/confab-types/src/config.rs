use serde::{Deserialize, Serialize};

/// Per-runner settings for streaming sessions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Capacity of the per-session event channel
    pub event_buffer: usize,
    /// Run completed replies through the validation stage
    pub validate: bool,
    /// Write the last snapshot of a cancelled reply into the store
    pub keep_cancelled_partial: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            event_buffer: 1000,
            validate: true,
            keep_cancelled_partial: true,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity.max(1);
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate = enabled;
        self
    }

    pub fn with_cancelled_partial(mut self, keep: bool) -> Self {
        self.keep_cancelled_partial = keep;
        self
    }
}
