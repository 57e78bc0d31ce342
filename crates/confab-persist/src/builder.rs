use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{PersistError, Result};
use crate::port::{FilePersistence, PersistencePort};
use crate::store::ThreadStore;

pub struct ThreadStoreBuilder {
    workspace_root: Option<PathBuf>,
    port: Option<Arc<dyn PersistencePort>>,
    preload: bool,
}

impl ThreadStoreBuilder {
    pub fn new() -> Self {
        Self {
            workspace_root: None,
            port: None,
            preload: false,
        }
    }

    pub fn workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = Some(root.into());
        self
    }

    /// Persistence target; defaults to [`FilePersistence`]
    pub fn port(mut self, port: Arc<dyn PersistencePort>) -> Self {
        self.port = Some(port);
        self
    }

    /// Load the snapshot during `build` instead of on first use
    pub fn preload(mut self, preload: bool) -> Self {
        self.preload = preload;
        self
    }

    pub async fn build(self) -> Result<ThreadStore> {
        let workspace_root = self
            .workspace_root
            .ok_or_else(|| PersistError::Internal("workspace_root is required".to_string()))?;
        let port = self
            .port
            .unwrap_or_else(|| Arc::new(FilePersistence::new()));

        let store = ThreadStore::new(workspace_root, port);
        if self.preload {
            store.load().await;
        }
        Ok(store)
    }
}

impl Default for ThreadStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::MemoryPersistence;

    #[tokio::test]
    async fn test_requires_workspace_root() {
        let result = ThreadStoreBuilder::new().build().await;
        assert!(matches!(result, Err(PersistError::Internal(_))));
    }

    #[tokio::test]
    async fn test_preload_reads_snapshot() {
        let port = Arc::new(MemoryPersistence::new());
        let store = ThreadStoreBuilder::new()
            .workspace_root("/ws")
            .port(port.clone())
            .preload(true)
            .build()
            .await
            .unwrap();

        assert!(store.is_loaded().await);
        assert_eq!(port.reads(), 1);
    }
}
