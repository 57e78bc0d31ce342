pub mod buffering;
pub mod chunk;
pub mod client;
pub mod config;
pub mod snapshot;
pub mod sse_parser;

pub use buffering::CircularLineBuffer;
pub use chunk::{ChatStreamChunk, ModelList};
pub use client::LocalModelBackend;
pub use config::{LocalModelConfig, DEFAULT_BASE_URL, DEFAULT_FINISH_GRACE_MS};
pub use snapshot::SnapshotBuilder;
pub use sse_parser::{parse_sse_stream, SseFrame};
