//! # Confab
//!
//! Local-first chat threads with streamed, cancellable assistant replies.
//!
//! ## Overview
//!
//! Confab keeps the conversations of one workspace in a single JSON file and
//! drives assistant replies as a stream of full-message snapshots:
//!
//! - **Threads** are named, ordered message lists stored under
//!   `<workspace>/.confab/threads.json`
//! - **Sessions** commit the user message, stream the reply and finish it as
//!   completed, cancelled or failed
//! - **Backends** produce the reply; [`LocalModelBackend`] talks to any
//!   OpenAI-compatible local server
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use confab::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = ThreadStoreBuilder::new()
//!         .workspace_root("/home/me/notes")
//!         .build()
//!         .await?;
//!
//!     let backend = LocalModelBackend::new(
//!         LocalModelConfig::new("http://localhost:1234/v1").with_model("qwen2.5-7b-instruct"),
//!     )?;
//!
//!     let runner = SessionRunner::builder()
//!         .store(store.clone())
//!         .backend(Arc::new(backend))
//!         .build()?;
//!
//!     let thread = store.create_thread(None).await;
//!     let mut handle = runner
//!         .open(SessionRequest::new(&thread.id, Message::user("Hello!")))
//!         .await;
//!
//!     while let Some(event) = handle.events.recv().await {
//!         if let Some(message) = event.message() {
//!             println!("{}", message.content);
//!         }
//!     }
//!
//!     store.flush().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **`confab-types`**: messages, threads and session events
//! - **`confab-persist`**: the workspace thread store and its persistence ports
//! - **`confab-session`**: streaming sessions, cancellation and the client accumulator
//! - **`confab-llm`**: reply backend for OpenAI-compatible local servers
//!
//! ## License
//!
//! MIT

pub mod prelude;

pub use confab_types::{
    Citation, ImageAttachment, Message, MessagePatch, MessageRole, MessageStatus,
    SessionConfig, SessionEvent, Thread, ThreadListItem, ThreadPatch, ToolCall, ToolCallStatus,
    ToolResult,
};

pub use confab_persist::{
    AddMessageOutcome, CascadeDeletion, FilePersistence, MemoryPersistence, PersistError,
    PersistencePort, ThreadStore, ThreadStoreBuilder,
};

pub use confab_session::{
    BackendError, BackendEvent, CancelRegistry, CancellationToken, MarkdownRepair, NoopValidator, ReplyAccumulator,
    ReplyBackend, ReplyOutcome, ReplyRequest, ReplyStream, ReplyUsage, SessionError,
    SessionHandle, SessionRequest, SessionRunner, SessionRunnerBuilder, SessionState, Validator,
};

#[cfg(feature = "local-llm")]
pub use confab_llm::{LocalModelBackend, LocalModelConfig};

// Crates needed to write a custom `ReplyBackend`
pub use async_trait::async_trait;
pub use futures;
pub use serde;
pub use serde_json;
pub use tokio;
