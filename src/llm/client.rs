//! Chat-completions client for the structuring service.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::StructuringConfig;

/// Errors from the structuring collaborator.
#[derive(Debug, Error)]
pub enum StructuringError {
    /// Failed to reach the service (DNS, connect, timeout).
    #[error("connection error: {0}")]
    Connection(String),

    /// The service answered with a non-success status.
    #[error("service error (HTTP {status}): {body}")]
    Service { status: u16, body: String },

    /// The completion envelope could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),
}

impl StructuringError {
    /// Whether retrying can help. Schema problems and client-side errors
    /// never become correct by retrying; overload and transport errors can.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Service { status, .. } => *status >= 500 || *status == 429,
            Self::Parse(_) => false,
        }
    }
}

/// Seam to the external structuring collaborator. Shared across workers;
/// implementations must be reentrant.
#[async_trait]
pub trait StructuringClient: Send + Sync {
    /// Send instructions plus a payload, returning the raw completion text.
    /// An empty `system` omits the system message entirely.
    async fn complete(&self, system: &str, user: &str) -> Result<String, StructuringError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u32,
}

/// HTTP client for an Azure OpenAI-style chat-completions deployment.
pub struct ChatCompletionClient {
    config: StructuringConfig,
    client: Client,
}

impl ChatCompletionClient {
    pub fn new(config: StructuringConfig) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { config, client }
    }

    pub fn config(&self) -> &StructuringConfig {
        &self.config
    }

    fn completions_url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.config.endpoint.trim_end_matches('/'),
            self.config.deployment,
            self.config.api_version
        )
    }
}

#[async_trait]
impl StructuringClient for ChatCompletionClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, StructuringError> {
        let mut messages = Vec::with_capacity(2);
        if !system.is_empty() {
            messages.push(ChatMessage {
                role: "system",
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: user.to_string(),
        });

        let request = ChatRequest {
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat {
                format_type: "json_object",
            },
        };

        let resp = self
            .client
            .post(self.completions_url())
            .header("api-key", &self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| StructuringError::Connection(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StructuringError::Service {
                status: status.as_u16(),
                body,
            });
        }

        let completion: ChatResponse = resp
            .json()
            .await
            .map_err(|e| StructuringError::Parse(e.to_string()))?;

        if let Some(usage) = &completion.usage {
            debug!(tokens_used = usage.total_tokens, "structuring call complete");
        }

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| StructuringError::Parse("completion had no content".to_string()))
    }
}
