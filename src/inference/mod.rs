//! Model clients used by agent sessions.
//!
//! Every model identity is reached through a [`ModelClient`]. Two backends
//! ship with the crate:
//!
//! - [`OpenAiClient`]: OpenAI-compatible `/v1/chat/completions` endpoint
//!   (vLLM, OpenRouter, llama.cpp server)
//! - [`ScriptedClient`]: in-process responses for tests and dry runs
//!
//! Clients only move text. Timeouts, retries and fallbacks are the agent
//! session's job.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::Result;

mod openai;
mod scripted;

pub use openai::OpenAiClient;
pub use scripted::ScriptedClient;

/// One completion call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model identity
    pub model: String,
    /// Full prompt, sent as a single user message
    pub prompt: String,
    /// Completion length limit
    pub max_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
    /// Chat template forwarded to the serving process
    pub chat_template: Option<String>,
}

impl CompletionRequest {
    /// Request with default sampling settings
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: 400,
            temperature: 0.7,
            chat_template: None,
        }
    }
}

/// Boxed future returned by [`ModelClient::complete`]
pub type CompletionFuture<'a> = BoxFuture<'a, Result<String>>;

/// Backend able to answer a prompt with text.
///
/// Implementations must be shareable across concurrently running games.
pub trait ModelClient: Send + Sync {
    /// Complete `request`, returning the raw model text
    fn complete<'a>(&'a self, request: &'a CompletionRequest) -> CompletionFuture<'a>;

    /// Backend name for logging
    fn name(&self) -> &'static str;
}
