use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;

/// Directory created under the workspace root
pub const STORE_DIR: &str = ".confab";
/// Snapshot file inside [`STORE_DIR`]
pub const STORE_FILE: &str = "threads.json";

/// Durable target the thread store persists through.
///
/// One serialized snapshot per workspace. `read` returns `Ok(None)` when the
/// workspace has never been written.
#[async_trait]
pub trait PersistencePort: Send + Sync {
    async fn read(&self, workspace: &Path) -> Result<Option<String>>;

    async fn write(&self, workspace: &Path, contents: &str) -> Result<()>;
}

/// JSON file at `<workspace>/.confab/threads.json`
#[derive(Debug, Clone, Default)]
pub struct FilePersistence;

impl FilePersistence {
    pub fn new() -> Self {
        Self
    }

    pub fn store_path(workspace: &Path) -> PathBuf {
        workspace.join(STORE_DIR).join(STORE_FILE)
    }
}

#[async_trait]
impl PersistencePort for FilePersistence {
    async fn read(&self, workspace: &Path) -> Result<Option<String>> {
        let path = Self::store_path(workspace);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, workspace: &Path, contents: &str) -> Result<()> {
        let path = Self::store_path(workspace);
        if let Some(dir) = path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        // Readers never see a half-written snapshot
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, contents).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(path = %path.display(), bytes = contents.len(), "Wrote thread snapshot");
        Ok(())
    }
}

/// In-memory port keyed by workspace root. Counts reads and writes.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    snapshots: Mutex<HashMap<PathBuf, String>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a workspace with raw contents
    pub fn with_snapshot(self, workspace: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        self.snapshots_guard()
            .insert(workspace.into(), contents.into());
        self
    }

    pub fn snapshot(&self, workspace: &Path) -> Option<String> {
        self.snapshots_guard().get(workspace).cloned()
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn snapshots_guard(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, String>> {
        self.snapshots
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl PersistencePort for MemoryPersistence {
    async fn read(&self, workspace: &Path) -> Result<Option<String>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot(workspace))
    }

    async fn write(&self, workspace: &Path, contents: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.snapshots_guard()
            .insert(workspace.to_path_buf(), contents.to_string());
        Ok(())
    }
}
