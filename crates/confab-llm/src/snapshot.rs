use std::time::Instant;

use confab_session::ReplyUsage;
use confab_types::{Message, MessageStatus, ToolCall};

use crate::chunk::ChatStreamChunk;

struct PartialToolCall {
    index: u32,
    id: String,
    name: String,
    arguments: String,
}

/// Folds completion deltas into a growing assistant message
pub struct SnapshotBuilder {
    content: String,
    model: Option<String>,
    tool_calls: Vec<PartialToolCall>,
    chunks: u64,
    reported_total: Option<u64>,
    last_token_at: Option<Instant>,
    samples: Vec<f64>,
}

impl SnapshotBuilder {
    pub fn new(model: Option<String>) -> Self {
        Self {
            content: String::new(),
            model,
            tool_calls: Vec::new(),
            chunks: 0,
            reported_total: None,
            last_token_at: None,
            samples: Vec::new(),
        }
    }

    /// Apply one chunk. Returns `true` when the visible message changed.
    pub fn apply(&mut self, chunk: &ChatStreamChunk) -> bool {
        if let Some(usage) = &chunk.usage {
            self.reported_total = Some(usage.total_tokens);
        }
        if self.model.is_none() {
            self.model = chunk.model.clone();
        }

        let mut changed = false;

        if let Some(text) = chunk.content().filter(|t| !t.is_empty()) {
            self.content.push_str(text);
            self.record_token();
            changed = true;
        }

        for delta in chunk.tool_call_deltas() {
            let position = match self.tool_calls.iter().position(|c| c.index == delta.index) {
                Some(position) => position,
                None => {
                    self.tool_calls.push(PartialToolCall {
                        index: delta.index,
                        id: format!("call_{}", delta.index),
                        name: String::new(),
                        arguments: String::new(),
                    });
                    self.tool_calls.len() - 1
                }
            };
            let call = &mut self.tool_calls[position];

            if let Some(id) = &delta.id {
                call.id = id.clone();
            }
            if let Some(function) = &delta.function {
                if let Some(name) = &function.name {
                    call.name.push_str(name);
                }
                if let Some(arguments) = &function.arguments {
                    call.arguments.push_str(arguments);
                }
            }
            changed = true;
        }

        if changed {
            self.chunks += 1;
        }
        changed
    }

    fn record_token(&mut self) {
        let now = Instant::now();
        if let Some(previous) = self.last_token_at {
            let elapsed = now.duration_since(previous).as_secs_f64();
            if elapsed > 0.0 {
                self.samples.push(1.0 / elapsed);
            }
        }
        self.last_token_at = Some(now);
    }

    pub fn snapshot(&self) -> Message {
        let mut message = Message::assistant(self.content.clone());
        message.status = Some(MessageStatus::Processing);
        message.model = self.model.clone();

        if !self.tool_calls.is_empty() {
            let calls = self
                .tool_calls
                .iter()
                .map(|call| {
                    let arguments = serde_json::from_str(&call.arguments)
                        .unwrap_or_else(|_| serde_json::Value::String(call.arguments.clone()));
                    ToolCall::new(call.id.clone(), call.name.clone(), arguments)
                })
                .collect();
            message.tool_calls = Some(calls);
        }

        message
    }

    /// Server-reported total when sent, otherwise the number of chunks
    pub fn usage(&self) -> ReplyUsage {
        ReplyUsage {
            total_tokens: self.reported_total.or(Some(self.chunks)),
            tokens_per_second_samples: self.samples.clone(),
        }
    }
}
