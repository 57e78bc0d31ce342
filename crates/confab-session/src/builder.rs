use std::sync::Arc;

use confab_persist::ThreadStore;
use confab_types::SessionConfig;

use crate::backend::ReplyBackend;
use crate::error::{Result, SessionError};
use crate::session::SessionRunner;
use crate::validator::{MarkdownRepair, NoopValidator, Validator};

/// Builder for constructing a SessionRunner with optional components
pub struct SessionRunnerBuilder {
    store: Option<ThreadStore>,
    backend: Option<Arc<dyn ReplyBackend>>,
    validator: Option<Arc<dyn Validator>>,
    config: SessionConfig,
}

impl SessionRunnerBuilder {
    pub fn new() -> Self {
        Self {
            store: None,
            backend: None,
            validator: None,
            config: SessionConfig::default(),
        }
    }

    pub fn store(mut self, store: ThreadStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn backend(mut self, backend: Arc<dyn ReplyBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Replace the default markdown repair pass
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<SessionRunner> {
        let store = self
            .store
            .ok_or(SessionError::MissingComponent("thread store"))?;
        let backend = self
            .backend
            .ok_or(SessionError::MissingComponent("reply backend"))?;

        let validator = match self.validator {
            Some(validator) => validator,
            None if self.config.validate => Arc::new(MarkdownRepair) as Arc<dyn Validator>,
            None => Arc::new(NoopValidator),
        };

        Ok(SessionRunner::new_with_validator(
            store,
            backend,
            validator,
            self.config,
        ))
    }
}

impl Default for SessionRunnerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
