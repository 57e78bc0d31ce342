use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use confab_types::{Message, MessagePatch, MessageRole, Thread, ThreadListItem, ThreadPatch};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::Result;
use crate::port::{FilePersistence, PersistencePort};
use crate::scheduler::WriteScheduler;

/// Result of [`ThreadStore::add_message`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMessageOutcome {
    /// The requested thread id was unknown and a new thread was created
    pub created_new_thread: bool,
    pub thread: Thread,
}

/// Result of [`ThreadStore::delete_message_from_all_threads`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CascadeDeletion {
    pub deleted_message_ids: Vec<String>,
    pub affected_thread_ids: Vec<String>,
}

impl CascadeDeletion {
    pub fn is_empty(&self) -> bool {
        self.deleted_message_ids.is_empty()
    }
}

#[derive(Debug)]
struct StoreState {
    loaded: bool,
    /// Bumped on every workspace switch so an in-progress load can tell it
    /// read the wrong workspace
    generation: u64,
    workspace_root: PathBuf,
    threads: Vec<Thread>,
}

impl StoreState {
    fn thread_mut(&mut self, thread_id: &str) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.id == thread_id)
    }

    fn thread(&self, thread_id: &str) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id == thread_id)
    }

    fn default_name(&self) -> String {
        format!("Conversation {}", self.threads.len() + 1)
    }
}

struct StoreInner {
    state: Mutex<StoreState>,
    load_lock: Mutex<()>,
    write_lock: Mutex<()>,
    port: Arc<dyn PersistencePort>,
    scheduler: WriteScheduler,
}

/// Owner of every thread in the current workspace.
///
/// All mutations are applied in memory under a single lock and then scheduled
/// for persistence; the persisted file trails the in-memory state. Clones
/// share the same store.
#[derive(Clone)]
pub struct ThreadStore {
    inner: Arc<StoreInner>,
}

impl ThreadStore {
    pub fn new(workspace_root: impl Into<PathBuf>, port: Arc<dyn PersistencePort>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                state: Mutex::new(StoreState {
                    loaded: false,
                    generation: 0,
                    workspace_root: workspace_root.into(),
                    threads: Vec::new(),
                }),
                load_lock: Mutex::new(()),
                write_lock: Mutex::new(()),
                port,
                scheduler: WriteScheduler::new(),
            }),
        }
    }

    /// Store backed by `<workspace_root>/.confab/threads.json`
    pub fn with_file(workspace_root: impl Into<PathBuf>) -> Self {
        Self::new(workspace_root, Arc::new(FilePersistence::new()))
    }

    pub async fn workspace_root(&self) -> PathBuf {
        self.inner.state.lock().await.workspace_root.clone()
    }

    pub async fn is_loaded(&self) -> bool {
        self.inner.state.lock().await.loaded
    }

    /// Read the persisted snapshot once.
    ///
    /// A missing, unreadable or malformed snapshot leaves the store empty.
    pub async fn load(&self) {
        if self.inner.state.lock().await.loaded {
            return;
        }

        let _loading = self.inner.load_lock.lock().await;
        loop {
            let (root, generation) = {
                let state = self.inner.state.lock().await;
                if state.loaded {
                    return;
                }
                (state.workspace_root.clone(), state.generation)
            };

            let threads = self.read_snapshot(&root).await;

            let mut state = self.inner.state.lock().await;
            if state.generation != generation {
                // workspace switched while reading
                continue;
            }
            state.threads = threads;
            state.loaded = true;
            tracing::info!(
                workspace = %root.display(),
                threads = state.threads.len(),
                "Thread store loaded"
            );
            return;
        }
    }

    /// Lock the state of a loaded workspace.
    ///
    /// A workspace switch between `load` and taking the lock leaves the state
    /// unloaded again; loading is retried so no operation runs against it.
    async fn loaded_state(&self) -> MutexGuard<'_, StoreState> {
        loop {
            self.load().await;
            let state = self.inner.state.lock().await;
            if state.loaded {
                return state;
            }
        }
    }

    async fn read_snapshot(&self, root: &Path) -> Vec<Thread> {
        let contents = match self.inner.port.read(root).await {
            Ok(Some(contents)) => contents,
            Ok(None) => return Vec::new(),
            Err(e) => {
                tracing::warn!(workspace = %root.display(), error = %e, "Unreadable thread snapshot, starting empty");
                return Vec::new();
            }
        };

        if contents.trim().is_empty() {
            return Vec::new();
        }

        match serde_json::from_str::<Vec<Thread>>(&contents) {
            Ok(mut threads) => {
                for thread in threads.iter_mut() {
                    if thread.updated_at < thread.created_at {
                        thread.updated_at = thread.created_at;
                    }
                }
                threads
            }
            Err(e) => {
                tracing::warn!(workspace = %root.display(), error = %e, "Malformed thread snapshot, starting empty");
                Vec::new()
            }
        }
    }

    /// Write the full collection now. Failures are returned to the caller.
    pub async fn save(&self) -> Result<()> {
        self.load().await;
        self.write_snapshot().await.map(|_| ())
    }

    /// Serialize and write the state as it is when the write starts.
    ///
    /// Returns `false` without writing when the store is unloaded.
    async fn write_snapshot(&self) -> Result<bool> {
        let _writing = self.inner.write_lock.lock().await;

        let (root, contents) = {
            let state = self.inner.state.lock().await;
            if !state.loaded {
                return Ok(false);
            }
            (
                state.workspace_root.clone(),
                serde_json::to_string_pretty(&state.threads)?,
            )
        };

        self.inner.port.write(&root, &contents).await?;
        Ok(true)
    }

    fn schedule_persist(&self) {
        if !self.inner.scheduler.request() {
            return;
        }

        let store = self.clone();
        tokio::spawn(async move {
            loop {
                if let Err(e) = store.write_snapshot().await {
                    tracing::error!(error = %e, "Failed to persist threads");
                    store.inner.scheduler.record_error(&e);
                }
                if !store.inner.scheduler.finish_pass() {
                    break;
                }
            }
        });
    }

    /// Wait for scheduled writes to land.
    ///
    /// Returns the last background write failure, if any.
    pub async fn flush(&self) -> Result<()> {
        self.inner.scheduler.flush().await
    }

    pub async fn create_thread(&self, name: Option<String>) -> Thread {
        let thread = {
            let mut state = self.loaded_state().await;
            let name = name.unwrap_or_else(|| state.default_name());
            let thread = Thread::new(name);
            state.threads.push(thread.clone());
            thread
        };

        tracing::debug!(thread_id = %thread.id, name = %thread.name, "Created thread");
        self.schedule_persist();
        thread
    }

    pub async fn delete_thread(&self, thread_id: &str) -> bool {
        let removed = {
            let mut state = self.loaded_state().await;
            let before = state.threads.len();
            state.threads.retain(|t| t.id != thread_id);
            state.threads.len() != before
        };

        if removed {
            tracing::debug!(thread_id, "Deleted thread");
            self.schedule_persist();
        }
        removed
    }

    pub async fn rename_thread(&self, thread_id: &str, name: impl Into<String>) -> bool {
        let name = name.into();
        self.update_thread(thread_id, move |thread| thread.name = name)
            .await
            .is_some()
    }

    /// Set or clear (`None`) the thread's custom prompt
    pub async fn update_thread_prompt(&self, thread_id: &str, prompt: Option<String>) -> bool {
        self.update_thread(thread_id, move |thread| thread.custom_prompt = prompt)
            .await
            .is_some()
    }

    /// Set or clear (`None`) the thread's summary
    pub async fn set_thread_summary(&self, thread_id: &str, summary: Option<String>) -> bool {
        self.update_thread(thread_id, move |thread| thread.summary = summary)
            .await
            .is_some()
    }

    /// Apply every field of `patch` as one mutation and return the result
    pub async fn update_thread_fields(&self, thread_id: &str, patch: ThreadPatch) -> Option<Thread> {
        self.update_thread(thread_id, move |thread| {
            patch.apply_to(thread);
            thread.clone()
        })
        .await
    }

    pub async fn clear_thread(&self, thread_id: &str) -> bool {
        self.update_thread(thread_id, |thread| thread.messages.clear())
            .await
            .is_some()
    }

    async fn update_thread<F, R>(&self, thread_id: &str, apply: F) -> Option<R>
    where
        F: FnOnce(&mut Thread) -> R,
    {
        let updated = {
            let mut state = self.loaded_state().await;
            state.thread_mut(thread_id).map(|thread| {
                thread.touch();
                apply(thread)
            })
        };

        if updated.is_some() {
            self.schedule_persist();
        }
        updated
    }

    /// Append a message, creating a thread when `thread_id` is unknown
    pub async fn add_message(&self, thread_id: &str, message: Message) -> AddMessageOutcome {
        let outcome = {
            let mut state = self.loaded_state().await;
            match state.threads.iter().position(|t| t.id == thread_id) {
                Some(index) => {
                    let thread = &mut state.threads[index];
                    thread.messages.push(message);
                    thread.touch();
                    AddMessageOutcome {
                        created_new_thread: false,
                        thread: thread.clone(),
                    }
                }
                None => {
                    let mut thread = Thread::new(state.default_name());
                    thread.messages.push(message);
                    state.threads.push(thread.clone());
                    AddMessageOutcome {
                        created_new_thread: true,
                        thread,
                    }
                }
            }
        };

        if outcome.created_new_thread {
            tracing::info!(
                requested = thread_id,
                thread_id = %outcome.thread.id,
                "Unknown thread, created a new one for the message"
            );
        }
        self.schedule_persist();
        outcome
    }

    pub async fn update_message(&self, thread_id: &str, message_id: &str, patch: MessagePatch) -> bool {
        let updated = {
            let mut state = self.loaded_state().await;
            match state.thread_mut(thread_id) {
                Some(thread) => match thread.message_mut(message_id) {
                    Some(message) => {
                        patch.apply_to(message);
                        thread.touch();
                        true
                    }
                    None => false,
                },
                None => false,
            }
        };

        if updated {
            self.schedule_persist();
        }
        updated
    }

    /// Replace the message with the same id in place, or append it.
    ///
    /// Returns `false` only when the thread is unknown.
    pub async fn upsert_message(&self, thread_id: &str, message: Message) -> bool {
        let stored = {
            let mut state = self.loaded_state().await;
            match state.thread_mut(thread_id) {
                Some(thread) => {
                    match thread.message_index(&message.id) {
                        Some(index) => thread.messages[index] = message,
                        None => thread.messages.push(message),
                    }
                    thread.touch();
                    true
                }
                None => false,
            }
        };

        if stored {
            self.schedule_persist();
        }
        stored
    }

    pub async fn delete_message(&self, thread_id: &str, message_id: &str) -> bool {
        let removed = {
            let mut state = self.loaded_state().await;
            match state.thread_mut(thread_id) {
                Some(thread) => match thread.message_index(message_id) {
                    Some(index) => {
                        thread.messages.remove(index);
                        thread.touch();
                        true
                    }
                    None => false,
                },
                None => false,
            }
        };

        if removed {
            self.schedule_persist();
        }
        removed
    }

    /// Delete a message wherever it appears, together with the assistant reply
    /// that directly follows it when the deleted message is a user message.
    pub async fn delete_message_from_all_threads(&self, message_id: &str) -> CascadeDeletion {
        let mut deletion = CascadeDeletion::default();
        {
            let mut state = self.loaded_state().await;
            let now = Utc::now();

            for thread in state.threads.iter_mut() {
                let Some(index) = thread.message_index(message_id) else {
                    continue;
                };

                let removed = thread.messages.remove(index);
                let pairs_with_next = removed.role == MessageRole::User
                    && thread
                        .messages
                        .get(index)
                        .is_some_and(|next| next.role == MessageRole::Assistant);
                push_unique(&mut deletion.deleted_message_ids, removed.id);

                if pairs_with_next {
                    let reply = thread.messages.remove(index);
                    push_unique(&mut deletion.deleted_message_ids, reply.id);
                }

                thread.touch_at(now);
                push_unique(&mut deletion.affected_thread_ids, thread.id.clone());
            }
        }

        if !deletion.is_empty() {
            tracing::debug!(
                message_id,
                deleted = deletion.deleted_message_ids.len(),
                threads = deletion.affected_thread_ids.len(),
                "Cascade deleted messages"
            );
            self.schedule_persist();
        }
        deletion
    }

    pub async fn get_thread(&self, thread_id: &str) -> Option<Thread> {
        self.loaded_state().await.thread(thread_id).cloned()
    }

    pub async fn get_thread_messages(&self, thread_id: &str) -> Option<Vec<Message>> {
        self.loaded_state()
            .await
            .thread(thread_id)
            .map(|t| t.messages.clone())
    }

    /// Threads ordered by `updated_at`, newest first
    pub async fn get_thread_list(&self) -> Vec<ThreadListItem> {
        let state = self.loaded_state().await;
        let mut items: Vec<ThreadListItem> = state.threads.iter().map(Thread::list_item).collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        items
    }

    pub async fn get_most_recent_thread(&self) -> Option<Thread> {
        let state = self.loaded_state().await;
        state
            .threads
            .iter()
            .max_by_key(|t| t.updated_at)
            .cloned()
    }

    pub async fn thread_count(&self) -> usize {
        self.loaded_state().await.threads.len()
    }

    /// Point the store at another workspace.
    ///
    /// A different root discards the in-memory state without persisting it and
    /// drops any trailing write; the next operation loads the new workspace.
    /// The same root is a no-op.
    pub async fn update_workspace_root(&self, new_root: impl Into<PathBuf>) {
        let new_root = new_root.into();
        let mut state = self.inner.state.lock().await;
        if state.workspace_root == new_root {
            return;
        }
        tracing::info!(
            from = %state.workspace_root.display(),
            to = %new_root.display(),
            "Switching workspace"
        );
        state.workspace_root = new_root;
        state.threads.clear();
        state.loaded = false;
        state.generation += 1;
        // still under the state lock: writes requested by the new workspace come after this
        self.inner.scheduler.cancel_pending();
    }
}

impl std::fmt::Debug for ThreadStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadStore").finish_non_exhaustive()
    }
}

fn push_unique(ids: &mut Vec<String>, id: String) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}
