//! OpenAI-compatible chat completions client.

use futures::FutureExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use super::{CompletionFuture, CompletionRequest, ModelClient};
use crate::config::InferenceConfig;
use crate::error::{GameError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    chat_template: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    total_tokens: u32,
}

/// Client for an OpenAI-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl OpenAiClient {
    /// Create a client for `endpoint`
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("mafia-graph/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        })
    }

    /// Create a client from inference configuration
    pub fn from_config(config: &InferenceConfig) -> Result<Self> {
        Self::new(config.endpoint.clone(), config.api_key.clone())
    }

    /// Endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn chat(&self, request: &CompletionRequest) -> Result<String> {
        let body = ChatRequest {
            model: &request.model,
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt.clone(),
            }],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            chat_template: request.chat_template.as_deref(),
        };

        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(GameError::Upstream(format!(
                    "rate limited by {}",
                    self.endpoint
                )));
            }
            return Err(GameError::Upstream(format!("API error {status}: {error_text}")));
        }

        let result: ChatResponse = response
            .json()
            .await
            .map_err(|e| GameError::Upstream(format!("JSON parse error: {e}")))?;

        if let Some(usage) = &result.usage {
            tracing::trace!(model = %request.model, tokens = usage.total_tokens, "completion");
        }

        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| GameError::Upstream("response has no choices".to_string()))
    }
}

impl ModelClient for OpenAiClient {
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a> {
        self.chat(request).boxed()
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}
