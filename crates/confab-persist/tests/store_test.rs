use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use confab_persist::{
    FilePersistence, MemoryPersistence, PersistError, PersistencePort, Result, ThreadStore,
};
use chrono::{DateTime, Utc};
use confab_types::{Message, MessagePatch, MessageStatus, Thread, ThreadPatch};
use tokio::sync::{Notify, Semaphore};

fn memory_store(root: &str) -> (ThreadStore, Arc<MemoryPersistence>) {
    let port = Arc::new(MemoryPersistence::new());
    (ThreadStore::new(root, port.clone()), port)
}

/// Blocks every write until permits are added to `gate`
struct GatedPort {
    inner: MemoryPersistence,
    entered: Notify,
    gate: Semaphore,
}

impl GatedPort {
    fn new() -> Self {
        Self {
            inner: MemoryPersistence::new(),
            entered: Notify::new(),
            gate: Semaphore::new(0),
        }
    }
}

#[async_trait]
impl PersistencePort for GatedPort {
    async fn read(&self, workspace: &Path) -> Result<Option<String>> {
        self.inner.read(workspace).await
    }

    async fn write(&self, workspace: &Path, contents: &str) -> Result<()> {
        self.entered.notify_one();
        let _permit = self.gate.acquire().await.unwrap();
        self.inner.write(workspace, contents).await
    }
}

struct FailingPort;

#[async_trait]
impl PersistencePort for FailingPort {
    async fn read(&self, _workspace: &Path) -> Result<Option<String>> {
        Ok(None)
    }

    async fn write(&self, _workspace: &Path, _contents: &str) -> Result<()> {
        Err(PersistError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "read-only workspace",
        )))
    }
}

fn parse_snapshot(contents: &str) -> Vec<Thread> {
    serde_json::from_str(contents).unwrap()
}

#[tokio::test]
async fn test_first_thread_is_conversation_1() {
    let (store, _) = memory_store("/ws");
    let thread = store.create_thread(None).await;

    assert_eq!(thread.name, "Conversation 1");
    assert!(thread.messages.is_empty());
    assert_eq!(thread.created_at, thread.updated_at);
}

#[tokio::test]
async fn test_load_reads_once() {
    let (store, port) = memory_store("/ws");

    tokio::join!(store.load(), store.load());
    store.load().await;
    store.get_thread_list().await;

    assert_eq!(port.reads(), 1);
    assert!(store.is_loaded().await);
}

#[tokio::test]
async fn test_malformed_snapshot_starts_empty() {
    let port = Arc::new(MemoryPersistence::new().with_snapshot("/ws", "{ not json"));
    let store = ThreadStore::new("/ws", port);

    assert!(store.get_thread_list().await.is_empty());
    assert!(store.is_loaded().await);
    assert_eq!(store.create_thread(None).await.name, "Conversation 1");
}

/// Asserts the thread moved forward (or stayed put) since `last` and records the new value
async fn assert_not_before(store: &ThreadStore, thread_id: &str, last: &mut DateTime<Utc>, step: &str) {
    let current = store.get_thread(thread_id).await.unwrap();
    assert!(current.updated_at >= *last, "updated_at went backwards after {}", step);
    assert!(current.updated_at >= current.created_at, "updated_at before created_at after {}", step);
    *last = current.updated_at;
}

#[tokio::test]
async fn test_updated_at_never_decreases() {
    let (store, _) = memory_store("/ws");
    let thread = store.create_thread(None).await;
    let mut last = thread.updated_at;

    let first = Message::user("hello");
    let first_id = first.id.clone();
    store.add_message(&thread.id, first).await;
    assert_not_before(&store, &thread.id, &mut last, "add").await;

    assert!(store.rename_thread(&thread.id, "Renamed").await);
    assert_not_before(&store, &thread.id, &mut last, "rename").await;

    assert!(store
        .update_message(&thread.id, &first_id, MessagePatch::new().content("edited"))
        .await);
    assert_not_before(&store, &thread.id, &mut last, "message patch").await;

    assert!(store
        .update_thread_prompt(&thread.id, Some("Be brief".to_string()))
        .await);
    assert_not_before(&store, &thread.id, &mut last, "prompt").await;

    assert!(store
        .update_thread_fields(&thread.id, ThreadPatch::new().summary(Some("s".to_string())))
        .await
        .is_some());
    assert_not_before(&store, &thread.id, &mut last, "field patch").await;

    assert!(store.delete_message(&thread.id, &first_id).await);
    assert_not_before(&store, &thread.id, &mut last, "delete").await;

    for _ in 0..3 {
        store.add_message(&thread.id, Message::assistant("x")).await;
        assert_not_before(&store, &thread.id, &mut last, "append").await;
    }
}

#[tokio::test]
async fn test_update_thread_fields_is_one_mutation() {
    let (store, port) = memory_store("/ws");
    let thread = store.create_thread(None).await;
    store
        .update_thread_prompt(&thread.id, Some("old prompt".to_string()))
        .await;
    store.flush().await.unwrap();
    let writes = port.writes();

    let updated = store
        .update_thread_fields(
            &thread.id,
            ThreadPatch::new()
                .name("Trip")
                .custom_prompt(None)
                .summary(Some("Lisbon plans".to_string())),
        )
        .await
        .unwrap();
    store.flush().await.unwrap();

    assert_eq!(updated.name, "Trip");
    assert!(updated.custom_prompt.is_none());
    assert_eq!(updated.summary.as_deref(), Some("Lisbon plans"));
    assert_eq!(store.get_thread(&thread.id).await.unwrap(), updated);
    assert_eq!(port.writes(), writes + 1);

    assert!(store
        .update_thread_fields("missing", ThreadPatch::new().name("x"))
        .await
        .is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutation_racing_workspace_switch_sees_loaded_state() {
    let one_thread = |name: &str| serde_json::to_string(&vec![Thread::new(name)]).unwrap();

    for _ in 0..200 {
        let port = Arc::new(
            MemoryPersistence::new()
                .with_snapshot("/a", one_thread("A1"))
                .with_snapshot("/b", one_thread("B1")),
        );
        let store = ThreadStore::new("/a", port);
        store.load().await;

        let creator = store.clone();
        let create = tokio::spawn(async move { creator.create_thread(None).await });
        let switcher = store.clone();
        let switch = tokio::spawn(async move { switcher.update_workspace_root("/b").await });
        let (created, _) = (create.await.unwrap(), switch.await.unwrap());

        // both workspaces hold one thread, so a loaded store always names it 2
        assert_eq!(created.name, "Conversation 2");
        assert!(store.thread_count().await >= 1);
    }
}

#[tokio::test]
async fn test_add_message_to_unknown_thread_creates_one() {
    let (store, _) = memory_store("/ws");
    store.create_thread(None).await;

    let outcome = store.add_message("stale-id", Message::user("hi")).await;

    assert!(outcome.created_new_thread);
    assert_ne!(outcome.thread.id, "stale-id");
    assert_eq!(outcome.thread.name, "Conversation 2");
    assert_eq!(outcome.thread.messages.len(), 1);

    let again = store
        .add_message(&outcome.thread.id, Message::assistant("hello"))
        .await;
    assert!(!again.created_new_thread);
    assert_eq!(again.thread.messages.len(), 2);
}

#[tokio::test]
async fn test_missing_targets_return_false() {
    let (store, port) = memory_store("/ws");
    let thread = store.create_thread(None).await;
    store.flush().await.unwrap();
    let writes = port.writes();

    assert!(!store.delete_thread("nope").await);
    assert!(!store.rename_thread("nope", "x").await);
    assert!(!store.clear_thread("nope").await);
    assert!(!store.update_thread_prompt("nope", None).await);
    assert!(!store.delete_message(&thread.id, "nope").await);
    assert!(!store
        .update_message(&thread.id, "nope", MessagePatch::new().content("x"))
        .await);
    assert!(store.get_thread("nope").await.is_none());
    assert!(store.get_thread_messages("nope").await.is_none());

    store.flush().await.unwrap();
    assert_eq!(port.writes(), writes);
}

#[tokio::test]
async fn test_clearing_prompt_removes_field() {
    let (store, port) = memory_store("/ws");
    let thread = store.create_thread(None).await;

    assert!(store
        .update_thread_prompt(&thread.id, Some("You are terse.".to_string()))
        .await);
    store.flush().await.unwrap();
    assert!(port
        .snapshot(Path::new("/ws"))
        .unwrap()
        .contains("customPrompt"));

    assert!(store.update_thread_prompt(&thread.id, None).await);
    store.flush().await.unwrap();

    let snapshot = port.snapshot(Path::new("/ws")).unwrap();
    assert!(!snapshot.contains("customPrompt"));
    assert!(!snapshot.contains("null"));
    assert!(store.get_thread(&thread.id).await.unwrap().custom_prompt.is_none());
}

#[tokio::test]
async fn test_summary_and_clear() {
    let (store, _) = memory_store("/ws");
    let thread = store.create_thread(None).await;
    store.add_message(&thread.id, Message::user("a")).await;

    assert!(store
        .set_thread_summary(&thread.id, Some("Greeting".to_string()))
        .await);
    assert!(store.clear_thread(&thread.id).await);

    let cleared = store.get_thread(&thread.id).await.unwrap();
    assert!(cleared.messages.is_empty());
    assert_eq!(cleared.summary.as_deref(), Some("Greeting"));
}

#[tokio::test]
async fn test_patch_cannot_reopen_terminal_message() {
    let (store, _) = memory_store("/ws");
    let thread = store.create_thread(None).await;
    let reply = Message::placeholder("reply-1", None).with_status(MessageStatus::Completed);
    store.add_message(&thread.id, reply).await;

    assert!(store
        .update_message(
            &thread.id,
            "reply-1",
            MessagePatch::new().status(MessageStatus::Processing).notes("n"),
        )
        .await);

    let stored = store.get_thread_messages(&thread.id).await.unwrap();
    assert_eq!(stored[0].status, Some(MessageStatus::Completed));
    assert_eq!(stored[0].notes.as_deref(), Some("n"));
}

#[tokio::test]
async fn test_list_and_most_recent_order() {
    let (store, _) = memory_store("/ws");
    assert!(store.get_most_recent_thread().await.is_none());

    let a = store.create_thread(None).await;
    let b = store.create_thread(None).await;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    store.add_message(&a.id, Message::user("bump")).await;

    let list = store.get_thread_list().await;
    assert_eq!(list.len(), 2);
    assert_eq!(list[0].id, a.id);
    assert_eq!(list[0].message_count, 1);
    assert_eq!(list[1].id, b.id);
    assert_eq!(store.get_most_recent_thread().await.unwrap().id, a.id);
}

#[tokio::test]
async fn test_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = ThreadStore::with_file(dir.path());

    let thread = store.create_thread(Some("Rust questions".to_string())).await;
    store.add_message(&thread.id, Message::user("What is Pin?")).await;
    store
        .add_message(
            &thread.id,
            Message::assistant("A pointer wrapper.").with_status(MessageStatus::Completed),
        )
        .await;
    store
        .update_thread_prompt(&thread.id, Some("Answer briefly".to_string()))
        .await;
    store.flush().await.unwrap();

    let reopened = ThreadStore::with_file(dir.path());
    let original = store.get_thread(&thread.id).await.unwrap();
    let loaded = reopened.get_thread(&thread.id).await.unwrap();

    assert_eq!(loaded.name, "Rust questions");
    assert_eq!(loaded.custom_prompt.as_deref(), Some("Answer briefly"));
    assert_eq!(loaded.messages.len(), 2);
    assert_eq!(loaded.messages[0].content, "What is Pin?");
    assert_eq!(loaded.messages[1].status, Some(MessageStatus::Completed));
    assert_eq!(
        loaded.updated_at.timestamp_millis(),
        original.updated_at.timestamp_millis()
    );
    assert_eq!(
        loaded.messages[0].timestamp.timestamp_millis(),
        original.messages[0].timestamp.timestamp_millis()
    );
}

#[tokio::test]
async fn test_string_and_numeric_timestamps_load_equal() {
    let snapshot = r#"[
        {
            "id": "t1",
            "name": "Imported",
            "messages": [
                {"id": "m1", "role": "user", "content": "hi", "timestamp": "2024-05-01T10:00:00.000Z"},
                {"id": "m2", "role": "assistant", "content": "hello", "timestamp": 1714557600000}
            ],
            "createdAt": "2024-05-01T10:00:00",
            "updatedAt": 1714557600000
        }
    ]"#;
    let port = Arc::new(MemoryPersistence::new().with_snapshot("/ws", snapshot));
    let store = ThreadStore::new("/ws", port);

    let thread = store.get_thread("t1").await.unwrap();
    assert_eq!(thread.created_at, thread.updated_at);
    assert_eq!(thread.messages[0].timestamp, thread.messages[1].timestamp);
    assert_eq!(thread.created_at.timestamp_millis(), 1714557600000);
}

#[tokio::test]
async fn test_writes_during_flight_coalesce() {
    let port = Arc::new(GatedPort::new());
    let store = ThreadStore::new("/ws", port.clone());

    store.create_thread(None).await;
    port.entered.notified().await;

    // first write is parked on the gate
    for i in 0..3 {
        store.create_thread(Some(format!("burst {}", i))).await;
    }

    port.gate.add_permits(16);
    store.flush().await.unwrap();

    assert_eq!(port.inner.writes(), 2);
    let written = parse_snapshot(&port.inner.snapshot(Path::new("/ws")).unwrap());
    assert_eq!(written.len(), 4);
    assert_eq!(written[3].name, "burst 2");
}

#[tokio::test]
async fn test_save_propagates_write_failure() {
    let store = ThreadStore::new("/ws", Arc::new(FailingPort));
    store.create_thread(None).await;

    let background = store.flush().await;
    assert!(matches!(background, Err(PersistError::Background(_))));

    let direct = store.save().await;
    assert!(matches!(direct, Err(PersistError::Io(_))));

    // memory state is intact
    assert_eq!(store.thread_count().await, 1);
}

#[tokio::test]
async fn test_workspace_switch_discards_without_writing() {
    let (store, port) = memory_store("/a");
    store.create_thread(Some("kept".to_string())).await;
    store.flush().await.unwrap();
    assert_eq!(port.writes(), 1);

    store.create_thread(Some("dropped".to_string())).await;
    store.update_workspace_root("/b").await;
    store.flush().await.unwrap();

    assert_eq!(port.writes(), 1);
    assert!(port.snapshot(Path::new("/b")).is_none());
    assert!(store.get_thread_list().await.is_empty());
    assert_eq!(store.workspace_root().await, Path::new("/b"));

    store.update_workspace_root("/a").await;
    let names: Vec<String> = store
        .get_thread_list()
        .await
        .into_iter()
        .map(|t| t.name)
        .collect();
    assert_eq!(names, vec!["kept"]);
}

#[tokio::test]
async fn test_same_workspace_is_noop() {
    let (store, port) = memory_store("/a");
    store.create_thread(None).await;

    store.update_workspace_root("/a").await;

    assert!(store.is_loaded().await);
    assert_eq!(store.thread_count().await, 1);
    assert_eq!(port.reads(), 1);
}

#[tokio::test]
async fn test_file_store_path() {
    let dir = tempfile::tempdir().unwrap();
    let store = ThreadStore::with_file(dir.path());
    store.create_thread(None).await;
    store.flush().await.unwrap();

    assert!(dir.path().join(".confab").join("threads.json").exists());
    assert_eq!(
        FilePersistence::store_path(dir.path()),
        dir.path().join(".confab/threads.json")
    );
}
