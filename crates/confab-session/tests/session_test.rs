use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use confab_persist::{MemoryPersistence, ThreadStore};
use confab_session::{
    BackendError, BackendEvent, ReplyBackend, ReplyRequest, ReplyStream, ReplyUsage,
    SessionConfig, SessionError, SessionEvent, SessionRequest, SessionRunner, SessionState,
};
use confab_types::{Message, MessageRole, MessageStatus, ToolCall, ToolCallStatus};
use tokio_util::sync::CancellationToken;

/// Replays a fixed list of events, optionally hanging afterwards until
/// cancelled
#[derive(Default)]
struct ScriptedBackend {
    items: Vec<Result<BackendEvent, BackendError>>,
    refuse: Option<BackendError>,
    hang: bool,
    endless: bool,
    seen: Mutex<Option<(ReplyRequest, CancellationToken)>>,
}

impl ScriptedBackend {
    fn replying(items: Vec<Result<BackendEvent, BackendError>>) -> Self {
        Self {
            items,
            ..Default::default()
        }
    }

    fn hanging(items: Vec<Result<BackendEvent, BackendError>>) -> Self {
        Self {
            items,
            hang: true,
            ..Default::default()
        }
    }

    fn seen_token(&self) -> CancellationToken {
        self.seen.lock().unwrap().as_ref().unwrap().1.clone()
    }

    fn seen_request(&self) -> ReplyRequest {
        self.seen.lock().unwrap().as_ref().unwrap().0.clone()
    }
}

#[async_trait]
impl ReplyBackend for ScriptedBackend {
    async fn generate(
        &self,
        request: ReplyRequest,
        cancel: CancellationToken,
    ) -> Result<ReplyStream, BackendError> {
        *self.seen.lock().unwrap() = Some((request, cancel.clone()));
        if let Some(error) = self.refuse.clone() {
            return Err(error);
        }

        let items = self.items.clone();
        let hang = self.hang;
        let endless = self.endless;
        Ok(Box::pin(async_stream::stream! {
            for item in items {
                yield item;
            }
            if endless {
                let mut n = 0u64;
                loop {
                    n += 1;
                    yield Ok(BackendEvent::Snapshot(Message::assistant(format!("chunk {}", n))));
                    tokio::task::yield_now().await;
                }
            }
            if hang {
                cancel.cancelled().await;
            }
        }))
    }

    fn default_model(&self) -> Option<String> {
        Some("local-test".to_string())
    }
}

fn snapshot(content: &str) -> Result<BackendEvent, BackendError> {
    Ok(BackendEvent::Snapshot(Message::assistant(content)))
}

async fn runner_with(backend: Arc<ScriptedBackend>, config: SessionConfig) -> (SessionRunner, String) {
    let store = ThreadStore::new("/ws", Arc::new(MemoryPersistence::new()));
    let thread = store.create_thread(None).await;
    (SessionRunner::new(store, backend, config), thread.id)
}

fn names(events: &[SessionEvent]) -> Vec<&'static str> {
    events.iter().map(SessionEvent::name).collect()
}

#[tokio::test]
async fn test_completed_session_commits_reply() {
    let backend = Arc::new(ScriptedBackend::replying(vec![
        snapshot("Hel"),
        snapshot("Hello  \n"),
        Ok(BackendEvent::Finished(Some(ReplyUsage {
            total_tokens: Some(12),
            tokens_per_second_samples: vec![30.0, 10.0, 20.0],
        }))),
    ]));
    let (runner, thread_id) = runner_with(backend.clone(), SessionConfig::default()).await;

    let handle = runner
        .open(SessionRequest::new(&thread_id, Message::user("Say hello")).with_reply_id("reply-1"))
        .await;
    assert!(!handle.created_new_thread);
    assert_eq!(handle.thread_id, thread_id);

    let (events, state) = handle.collect().await;
    assert_eq!(state, Some(SessionState::Completed));
    assert_eq!(
        names(&events),
        vec!["connected", "message-update", "message-update", "completed"]
    );

    for update in &events[1..3] {
        let message = update.message().unwrap();
        assert_eq!(message.id, "reply-1");
        assert_eq!(message.status, Some(MessageStatus::Processing));
        assert_eq!(message.model.as_deref(), Some("local-test"));
    }

    let done = events[3].message().unwrap();
    assert_eq!(done.content, "Hello");
    assert_eq!(done.status, Some(MessageStatus::Completed));
    assert_eq!(done.total_tokens, Some(12));
    assert_eq!(done.median_tokens_per_second, Some(20.0));

    let stored = runner.store().get_thread_messages(&thread_id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].content, "Say hello");
    assert_eq!(stored[1], *done);

    // the backend saw the history ending with the user message
    let request = backend.seen_request();
    assert_eq!(request.history.last().unwrap().content, "Say hello");
    assert_eq!(request.reply_id, "reply-1");
}

#[tokio::test]
async fn test_end_of_stream_completes_without_metrics() {
    let backend = Arc::new(ScriptedBackend::replying(vec![snapshot("done")]));
    let (runner, thread_id) = runner_with(backend, SessionConfig::default()).await;

    let (events, state) = runner
        .open(SessionRequest::new(&thread_id, Message::user("q")))
        .await
        .collect()
        .await;

    assert_eq!(state, Some(SessionState::Completed));
    let done = events.last().unwrap().message().unwrap();
    assert_eq!(done.total_tokens, None);
    assert_eq!(done.median_tokens_per_second, None);
}

#[tokio::test]
async fn test_snapshot_identity_is_forced() {
    let mut foreign = Message::user("looks like a user");
    foreign.id = "backend-chosen".to_string();
    foreign.status = Some(MessageStatus::Completed);
    let backend = Arc::new(ScriptedBackend::replying(vec![Ok(BackendEvent::Snapshot(foreign))]));
    let (runner, thread_id) = runner_with(backend, SessionConfig::default()).await;

    let handle = runner
        .open(SessionRequest::new(&thread_id, Message::user("q")))
        .await;
    let reply_id = handle.reply_id.clone();
    let (events, _) = handle.collect().await;

    let update = events[1].message().unwrap();
    assert_eq!(update.id, reply_id);
    assert_eq!(update.role, MessageRole::Assistant);
    assert_eq!(update.status, Some(MessageStatus::Processing));
    assert_eq!(events.last().unwrap().message().unwrap().id, reply_id);
}

#[tokio::test]
async fn test_backend_failure_leaves_only_user_message() {
    let backend = Arc::new(ScriptedBackend::replying(vec![
        snapshot("partial"),
        Err(BackendError::Failed("connection reset".to_string())),
    ]));
    let (runner, thread_id) = runner_with(backend, SessionConfig::default()).await;

    let (events, state) = runner
        .open(SessionRequest::new(&thread_id, Message::user("q")))
        .await
        .collect()
        .await;

    assert_eq!(state, Some(SessionState::Errored));
    assert_eq!(names(&events), vec!["connected", "message-update", "error"]);
    assert_eq!(
        events[2],
        SessionEvent::Error {
            error: "connection reset".to_string()
        }
    );

    let stored = runner.store().get_thread_messages(&thread_id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert!(stored[0].is_user());
}

#[tokio::test]
async fn test_model_not_loaded() {
    let backend = Arc::new(ScriptedBackend {
        refuse: Some(BackendError::ModelNotLoaded {
            model_id: "llama-3.1-8b".to_string(),
            message: "Model is not loaded".to_string(),
        }),
        ..Default::default()
    });
    let (runner, thread_id) = runner_with(backend, SessionConfig::default()).await;

    let (events, state) = runner
        .open(SessionRequest::new(&thread_id, Message::user("q")))
        .await
        .collect()
        .await;

    assert_eq!(state, Some(SessionState::ModelUnavailable));
    assert_eq!(names(&events), vec!["connected", "local-model-not-loaded"]);
    assert_eq!(
        events[1].data(),
        serde_json::json!({"modelId": "llama-3.1-8b", "error": "Model is not loaded"})
    );
    assert_eq!(runner.store().get_thread_messages(&thread_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancel_while_processing() {
    let mut running = Message::assistant("Searching");
    running.tool_calls = Some(vec![
        ToolCall::new("t1", "web_search", serde_json::json!({"q": "tokio"}))
            .with_status(ToolCallStatus::Running),
    ]);
    let backend = Arc::new(ScriptedBackend::hanging(vec![Ok(BackendEvent::Snapshot(running))]));
    let (runner, thread_id) = runner_with(backend.clone(), SessionConfig::default()).await;

    let mut handle = runner
        .open(SessionRequest::new(&thread_id, Message::user("look it up")))
        .await;
    let reply_id = handle.reply_id.clone();

    assert_eq!(handle.events.recv().await.unwrap(), SessionEvent::Connected);
    let first = handle.events.recv().await.unwrap();
    assert_eq!(first.message().unwrap().status, Some(MessageStatus::Processing));

    assert!(runner.cancel(&handle.thread_id, &reply_id));

    let (rest, state) = handle.collect().await;
    assert_eq!(state, Some(SessionState::Cancelled));
    assert_eq!(rest.len(), 1);

    let last = rest[0].message().unwrap();
    assert_eq!(last.status, Some(MessageStatus::Cancelled));
    assert_eq!(last.content, "Searching");
    assert_eq!(
        last.tool_calls.as_ref().unwrap()[0].status,
        Some(ToolCallStatus::Cancelled)
    );
    assert!(rest[0].is_terminal());

    // backend token was signalled
    assert!(backend.seen_token().is_cancelled());

    let stored = runner.store().get_thread_messages(&thread_id).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].status, Some(MessageStatus::Cancelled));
    assert!(!runner.cancel(&thread_id, &reply_id));
}

#[tokio::test]
async fn test_cancel_wins_over_in_flight_snapshots() {
    let backend = Arc::new(ScriptedBackend {
        endless: true,
        ..Default::default()
    });
    let (runner, thread_id) = runner_with(backend, SessionConfig::default()).await;

    let mut handle = runner
        .open(SessionRequest::new(&thread_id, Message::user("go")))
        .await;
    handle.events.recv().await.unwrap();
    handle.events.recv().await.unwrap();

    assert!(runner.cancel(&handle.thread_id, &handle.user_message_id));

    let (rest, state) = handle.collect().await;
    assert_eq!(state, Some(SessionState::Cancelled));
    assert!(rest.iter().all(|e| e.name() == "message-update"));
    assert_eq!(
        rest.last().unwrap().message().unwrap().status,
        Some(MessageStatus::Cancelled)
    );
}

#[tokio::test]
async fn test_cancelled_partial_can_be_discarded() {
    let backend = Arc::new(ScriptedBackend::hanging(vec![snapshot("half")]));
    let config = SessionConfig::new().with_cancelled_partial(false);
    let (runner, thread_id) = runner_with(backend, config).await;

    let mut handle = runner
        .open(SessionRequest::new(&thread_id, Message::user("q")))
        .await;
    handle.events.recv().await.unwrap();
    handle.events.recv().await.unwrap();
    runner.cancel(&thread_id, &handle.reply_id);

    let (_, state) = handle.collect().await;
    assert_eq!(state, Some(SessionState::Cancelled));
    assert_eq!(runner.store().get_thread_messages(&thread_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_thread_is_created() {
    let backend = Arc::new(ScriptedBackend::replying(vec![snapshot("hi")]));
    let (runner, _) = runner_with(backend, SessionConfig::default()).await;

    let handle = runner
        .open(SessionRequest::new("stale", Message::user("hello?")))
        .await;

    assert!(handle.created_new_thread);
    assert_ne!(handle.thread_id, "stale");
    let thread_id = handle.thread_id.clone();
    let (_, state) = handle.collect().await;

    assert_eq!(state, Some(SessionState::Completed));
    let thread = runner.store().get_thread(&thread_id).await.unwrap();
    assert_eq!(thread.name, "Conversation 2");
    assert_eq!(thread.messages.len(), 2);
}

#[tokio::test]
async fn test_dropped_client_still_commits() {
    let backend = Arc::new(ScriptedBackend::replying(vec![snapshot("a"), snapshot("ab")]));
    let (runner, thread_id) = runner_with(backend, SessionConfig::new().with_event_buffer(1)).await;

    let handle = runner
        .open(SessionRequest::new(&thread_id, Message::user("q")))
        .await;
    drop(handle.events);

    assert_eq!(handle.task.await.unwrap(), SessionState::Completed);
    let stored = runner.store().get_thread_messages(&thread_id).await.unwrap();
    assert_eq!(stored[1].content, "ab");
    assert_eq!(stored[1].status, Some(MessageStatus::Completed));
}

#[tokio::test]
async fn test_cancel_unknown_session() {
    let backend = Arc::new(ScriptedBackend::replying(vec![]));
    let (runner, thread_id) = runner_with(backend, SessionConfig::default()).await;
    assert!(!runner.cancel(&thread_id, "nothing-running"));
}

#[tokio::test]
async fn test_builder_requires_backend() {
    let store = ThreadStore::new("/ws", Arc::new(MemoryPersistence::new()));
    let result = SessionRunner::builder().store(store).build();
    assert!(matches!(result, Err(SessionError::MissingComponent(_))));
}

#[tokio::test]
async fn test_validation_can_be_disabled() {
    let backend = Arc::new(ScriptedBackend::replying(vec![snapshot("```\nunclosed  ")]));
    let store = ThreadStore::new("/ws", Arc::new(MemoryPersistence::new()));
    let runner = SessionRunner::builder()
        .store(store)
        .backend(backend)
        .config(SessionConfig::new().with_validation(false))
        .build()
        .unwrap();

    let (events, _) = runner
        .open(SessionRequest::new("any", Message::user("q")))
        .await
        .collect()
        .await;
    assert_eq!(
        events.last().unwrap().message().unwrap().content,
        "```\nunclosed  "
    );
}
