use std::sync::Arc;

use confab_persist::ThreadStore;
use confab_session::SessionRunner;

use crate::config::Config;

/// Shared application state passed to all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: ThreadStore,
    pub sessions: SessionRunner,
}

impl AppState {
    /// The runner must write into `store`
    pub fn new(config: Config, sessions: SessionRunner) -> Self {
        Self {
            config: Arc::new(config),
            store: sessions.store().clone(),
            sessions,
        }
    }
}
