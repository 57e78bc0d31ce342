//! Trailing-write scheduling.
//!
//! At most one writer runs at a time. A request that arrives while a write is
//! in flight only raises the pending flag, so any burst of mutations during a
//! write collapses into a single trailing write.

use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use crate::error::{PersistError, Result};

#[derive(Debug, Default)]
struct SchedulerState {
    in_flight: bool,
    pending: bool,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
pub struct WriteScheduler {
    state: Mutex<SchedulerState>,
    idle: Notify,
}

impl WriteScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for a write. Returns `true` when the caller must start a writer.
    pub fn request(&self) -> bool {
        let mut state = self.lock();
        if state.in_flight {
            state.pending = true;
            false
        } else {
            state.in_flight = true;
            true
        }
    }

    /// Called by the writer after each pass. Returns `true` when another pass
    /// was requested meanwhile; otherwise the writer is released.
    pub fn finish_pass(&self) -> bool {
        let rerun = {
            let mut state = self.lock();
            if state.pending {
                state.pending = false;
                true
            } else {
                state.in_flight = false;
                false
            }
        };
        if !rerun {
            self.idle.notify_waiters();
        }
        rerun
    }

    /// Drop a requested trailing write that has not started yet
    pub fn cancel_pending(&self) {
        self.lock().pending = false;
    }

    pub fn record_error(&self, error: &PersistError) {
        self.lock().last_error = Some(error.to_string());
    }

    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        !state.in_flight && !state.pending
    }

    /// Wait until no write is in flight or pending.
    ///
    /// Returns the last background failure since the previous flush.
    pub async fn flush(&self) -> Result<()> {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if !state.in_flight {
                    return match state.last_error.take() {
                        Some(message) => Err(PersistError::Background(message)),
                        None => Ok(()),
                    };
                }
            }

            notified.await;
        }
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
