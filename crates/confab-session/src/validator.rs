use async_trait::async_trait;
use confab_types::Message;

/// Last pass over a finished reply before it is committed.
///
/// May rewrite the content; the session restores id and role afterwards.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, message: Message) -> Message;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopValidator;

#[async_trait]
impl Validator for NoopValidator {
    async fn validate(&self, message: Message) -> Message {
        message
    }
}

/// Fixes markdown left broken by a truncated generation
#[derive(Debug, Clone, Copy, Default)]
pub struct MarkdownRepair;

impl MarkdownRepair {
    pub fn repair(content: &str) -> String {
        let mut repaired = content.trim_end().to_string();

        let fences = repaired
            .lines()
            .filter(|line| line.trim_start().starts_with("```"))
            .count();
        if fences % 2 == 1 {
            repaired.push_str("\n```");
        }

        repaired
    }
}

#[async_trait]
impl Validator for MarkdownRepair {
    async fn validate(&self, mut message: Message) -> Message {
        message.content = Self::repair(&message.content);
        message
    }
}
