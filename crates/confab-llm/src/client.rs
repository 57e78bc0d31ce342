use anyhow::{Context, Result};
use async_trait::async_trait;
use confab_session::{BackendError, BackendEvent, ReplyBackend, ReplyRequest, ReplyStream};
use confab_types::{Message, MessageRole};
use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::chunk::ModelList;
use crate::config::LocalModelConfig;
use crate::snapshot::SnapshotBuilder;
use crate::sse_parser::{parse_sse_stream, SseFrame};

/// Backend for a local OpenAI-compatible server (LM Studio, llama.cpp, Ollama)
pub struct LocalModelBackend {
    http_client: reqwest::Client,
    config: LocalModelConfig,
}

impl LocalModelBackend {
    pub fn new(config: LocalModelConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(api_key) = &config.api_key {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", api_key))
                    .context("Invalid API key format")?,
            );
        }

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { http_client, config })
    }

    pub fn config(&self) -> &LocalModelConfig {
        &self.config
    }

    /// Models the server currently has available
    pub async fn list_models(&self) -> Result<ModelList> {
        let response = self
            .http_client
            .get(self.config.endpoint("models"))
            .send()
            .await
            .context("Failed to reach local model server")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Local model server error ({}): {}", status, error_text);
        }

        response
            .json()
            .await
            .context("Failed to parse model list")
    }

    async fn ensure_loaded(&self, model: &str) -> std::result::Result<(), BackendError> {
        let models = self
            .list_models()
            .await
            .map_err(|e| BackendError::Failed(format!("{:#}", e)))?;

        if models.contains(model) {
            Ok(())
        } else {
            Err(BackendError::ModelNotLoaded {
                model_id: model.to_string(),
                message: format!("Model \"{}\" is not loaded on the local server", model),
            })
        }
    }

    fn build_chat_request(&self, model: &str, request: &ReplyRequest) -> Value {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        if let Some(prompt) = request.system_prompt.as_deref().filter(|p| !p.trim().is_empty()) {
            messages.push(serde_json::json!({ "role": "system", "content": prompt }));
        }
        messages.extend(request.history.iter().filter_map(convert_message));

        let mut payload = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });

        if let Some(obj) = payload.as_object_mut() {
            if let Some(temp) = self.config.temperature {
                obj.insert("temperature".to_string(), serde_json::json!(temp));
            }
            if let Some(max_tokens) = self.config.max_tokens {
                obj.insert("max_tokens".to_string(), serde_json::json!(max_tokens));
            }
        }

        payload
    }
}

fn convert_message(message: &Message) -> Option<Value> {
    let role = match message.role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    };
    if message.content.is_empty() {
        return None;
    }
    Some(serde_json::json!({ "role": role, "content": message.content }))
}

/// Map a failed completion call onto the backend error taxonomy
fn classify_error(model: &str, status: StatusCode, body: &str) -> BackendError {
    let lowered = body.to_lowercase();
    let not_loaded = lowered.contains("not loaded")
        || lowered.contains("no models loaded")
        || (lowered.contains("model") && lowered.contains("not found"));

    if not_loaded {
        BackendError::ModelNotLoaded {
            model_id: model.to_string(),
            message: body.trim().to_string(),
        }
    } else {
        BackendError::Failed(format!("Local model server error ({}): {}", status, body.trim()))
    }
}

#[async_trait]
impl ReplyBackend for LocalModelBackend {
    async fn generate(
        &self,
        request: ReplyRequest,
        cancel: CancellationToken,
    ) -> std::result::Result<ReplyStream, BackendError> {
        let model = request
            .model
            .clone()
            .or_else(|| self.config.model.clone())
            .ok_or_else(|| BackendError::Failed("No model selected".to_string()))?;

        if self.config.verify_loaded {
            self.ensure_loaded(&model).await?;
        }

        let payload = self.build_chat_request(&model, &request);
        tracing::debug!(
            thread_id = %request.thread_id,
            reply_id = %request.reply_id,
            model = %model,
            "Requesting chat completion"
        );

        let response = self
            .http_client
            .post(self.config.endpoint("chat/completions"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| BackendError::Failed(format!("Failed to reach local model server: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_error(&model, status, &error_text));
        }

        let mut frames = parse_sse_stream(response.bytes_stream());
        let mut builder = SnapshotBuilder::new(Some(model));

        let grace = self.config.finish_grace();

        Ok(Box::pin(async_stream::stream! {
            // Set once a chunk carries `finish_reason`; after that each frame is
            // awaited for at most `grace`.
            let mut finishing = false;

            loop {
                let next = async {
                    if finishing {
                        tokio::time::timeout(grace, frames.next()).await.ok()
                    } else {
                        Some(frames.next().await)
                    }
                };
                let frame = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    frame = next => frame,
                };

                let frame = match frame {
                    Some(frame) => frame,
                    None => {
                        tracing::debug!("No [DONE] after finish_reason, closing stream");
                        yield Ok(BackendEvent::Finished(Some(builder.usage())));
                        break;
                    }
                };

                match frame {
                    Some(Ok(SseFrame::Chunk(chunk))) => {
                        if builder.apply(&chunk) {
                            yield Ok(BackendEvent::Snapshot(builder.snapshot()));
                        }
                        finishing |= chunk.finish_reason().is_some();
                        if finishing && chunk.usage.is_some() {
                            yield Ok(BackendEvent::Finished(Some(builder.usage())));
                            break;
                        }
                    }
                    Some(Ok(SseFrame::Done)) | None => {
                        yield Ok(BackendEvent::Finished(Some(builder.usage())));
                        break;
                    }
                    Some(Err(e)) => {
                        yield Err(BackendError::Failed(e.to_string()));
                        break;
                    }
                }
            }
        }))
    }

    fn default_model(&self) -> Option<String> {
        self.config.model.clone()
    }
}
