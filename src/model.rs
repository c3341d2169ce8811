use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

use crate::history::ConversationMessage;

pub const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
pub const DEFAULT_MODEL: &str = "autoglm-phone";

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model API error ({status}): {message}")]
    Http { status: u16, message: String },
    #[error("model request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unreadable model response: {0}")]
    Decode(String),
    #[error("model returned no content")]
    EmptyResponse,
}

/// The vision model that decides the next action.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Whether an API credential is configured. Checked before a task starts.
    fn has_credential(&self) -> bool;

    /// Send the full conversation and return the raw reply text.
    async fn send(&self, history: &[ConversationMessage]) -> Result<String, ModelError>;
}

#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Upper bound for one HTTP exchange, enforced by reqwest.
    pub request_timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

/// OpenAI-compatible `chat/completions` client.
pub struct HttpModelClient {
    client: Client,
    config: ModelConfig,
}

impl HttpModelClient {
    pub fn new(config: ModelConfig) -> Result<Self, ModelError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl ModelClient for HttpModelClient {
    fn has_credential(&self) -> bool {
        !self.config.api_key.trim().is_empty()
    }

    async fn send(&self, history: &[ConversationMessage]) -> Result<String, ModelError> {
        debug!(messages = history.len(), model = %self.config.model, "sending conversation");

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&json!({
                "model": self.config.model,
                "messages": history,
                "max_tokens": 3000,
                "temperature": 0.0,
                "top_p": 0.85,
                "frequency_penalty": 0.2,
                "stream": false,
            }))
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["error"]["message"].as_str().map(String::from))
                .unwrap_or(body);
            warn!(%status, %message, "model API error");
            return Err(ModelError::Http {
                status: status.as_u16(),
                message,
            });
        }

        content_from_body(&body)
    }
}

/// Pull `choices[0].message.content` out of a completion body.
fn content_from_body(body: &str) -> Result<String, ModelError> {
    let json: serde_json::Value =
        serde_json::from_str(body).map_err(|e| ModelError::Decode(e.to_string()))?;
    let content = json["choices"][0]["message"]["content"]
        .as_str()
        .ok_or_else(|| ModelError::Decode(format!("no content in {json}")))?;
    if content.trim().is_empty() {
        return Err(ModelError::EmptyResponse);
    }
    Ok(content.to_string())
}
