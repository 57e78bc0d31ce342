pub mod config;
pub mod events;
pub mod message;
pub mod thread;
pub mod timestamp;

pub use config::SessionConfig;
pub use events::SessionEvent;
pub use message::{
    Citation, ImageAttachment, Message, MessagePatch, MessageRole, MessageStatus, ToolCall,
    ToolCallStatus, ToolResult,
};
pub use thread::{Thread, ThreadListItem, ThreadPatch};
