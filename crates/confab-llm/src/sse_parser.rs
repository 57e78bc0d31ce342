use anyhow::Result;
use futures::{Stream, StreamExt};
use std::pin::Pin;

use crate::buffering::CircularLineBuffer;
use crate::chunk::ChatStreamChunk;

#[derive(Debug, Clone)]
pub enum SseFrame {
    Chunk(ChatStreamChunk),
    /// The `[DONE]` marker
    Done,
}

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<SseFrame>> + Send>>;

/// Turn a chunked `text/event-stream` body into completion chunks.
///
/// Only `data:` lines are interpreted; comments, `event:` lines and blank
/// separators are skipped. The stream ends after `[DONE]`.
pub fn parse_sse_stream<S, B, E>(body: S) -> FrameStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    Box::pin(async_stream::stream! {
        let mut byte_chunks = Box::pin(body);
        let mut buffer = CircularLineBuffer::with_capacity(8192);

        'body: while let Some(chunk_result) = byte_chunks.next().await {
            match chunk_result {
                Ok(bytes) => {
                    buffer.extend(bytes.as_ref());

                    while let Some(line_result) = buffer.next_line() {
                        match line_result {
                            Ok(line) => match parse_line(&line) {
                                Some(Ok(SseFrame::Done)) => {
                                    yield Ok(SseFrame::Done);
                                    break 'body;
                                }
                                Some(frame) => yield frame,
                                None => {}
                            },
                            Err(e) => yield Err(e),
                        }
                    }
                }
                Err(e) => {
                    yield Err(anyhow::anyhow!("Stream error: {}", e));
                    break 'body;
                }
            }
        }

        if let Some(line) = buffer.take_remainder() {
            if let Some(frame) = parse_line(&line) {
                yield frame;
            }
        }
    })
}

fn parse_line(line: &str) -> Option<Result<SseFrame>> {
    let data = line.strip_prefix("data:")?.trim_start();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(SseFrame::Done));
    }

    Some(
        serde_json::from_str::<ChatStreamChunk>(data)
            .map(SseFrame::Chunk)
            .map_err(|e| anyhow::anyhow!("Failed to parse chat chunk: {}", e)),
    )
}
