pub mod accumulator;
pub mod backend;
pub mod builder;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod session;
pub mod state;
pub mod validator;

pub use accumulator::{ReplyAccumulator, ReplyOutcome};
pub use backend::{BackendError, BackendEvent, ReplyBackend, ReplyRequest, ReplyStream, ReplyUsage};
pub use builder::SessionRunnerBuilder;
pub use error::SessionError;
pub use registry::{CancelRegistry, Registration};
pub use session::{EventSender, SessionHandle, SessionRequest, SessionRunner};
pub use state::SessionState;
pub use validator::{MarkdownRepair, NoopValidator, Validator};

// Re-export key types from confab-types
pub use confab_types::{SessionConfig, SessionEvent};

// Part of the `ReplyBackend` signature
pub use tokio_util::sync::CancellationToken;
