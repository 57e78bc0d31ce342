use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default endpoint of a local OpenAI-compatible server
pub const DEFAULT_BASE_URL: &str = "http://localhost:1234/v1";

/// How long to wait for `[DONE]` or the usage chunk after a `finish_reason`
pub const DEFAULT_FINISH_GRACE_MS: u64 = 500;

fn default_finish_grace_ms() -> u64 {
    DEFAULT_FINISH_GRACE_MS
}

/// Configuration for a local OpenAI-compatible server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalModelConfig {
    pub base_url: String,
    /// Model used when a request does not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Check `/models` before every generation
    #[serde(default)]
    pub verify_loaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_finish_grace_ms")]
    pub finish_grace_ms: u64,
}

impl Default for LocalModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: None,
            api_key: None,
            verify_loaded: true,
            temperature: None,
            max_tokens: None,
            finish_grace_ms: DEFAULT_FINISH_GRACE_MS,
        }
    }
}

impl LocalModelConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_verify_loaded(mut self, verify: bool) -> Self {
        self.verify_loaded = verify;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_finish_grace(mut self, grace: Duration) -> Self {
        self.finish_grace_ms = grace.as_millis() as u64;
        self
    }

    pub(crate) fn finish_grace(&self) -> Duration {
        Duration::from_millis(self.finish_grace_ms)
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}
