//! Prelude module for convenient imports
//!
//! Import everything you need with:
//! ```rust
//! use confab::prelude::*;
//! ```

pub use crate::{
    Message, MessagePatch, MessageRole, MessageStatus, SessionConfig, SessionEvent, Thread,
    ThreadListItem, ToolCall,
    PersistencePort, ThreadStore, ThreadStoreBuilder,
    ReplyAccumulator, ReplyBackend, ReplyOutcome, SessionRequest, SessionRunner, SessionState,
};

#[cfg(feature = "local-llm")]
pub use crate::{LocalModelBackend, LocalModelConfig};
