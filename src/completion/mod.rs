// Chat completion backends
//
// The orchestrator only sees the `CompletionService` trait; concrete clients
// are created by `CompletionFactory` from the `[translate]` config section.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::TranslateConfig;
use crate::conversation::ConversationMessage;
use crate::error::Result;

pub use openai::OpenAiClient;

/// Why the service stopped generating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopSignal {
    /// The model finished its answer
    Stop,
    /// The output hit the length limit and needs a continuation turn
    Length,
    Other(String),
}

impl StopSignal {
    pub fn from_finish_reason(reason: Option<&str>) -> Self {
        match reason {
            Some("stop") => Self::Stop,
            Some("length") => Self::Length,
            Some(other) => Self::Other(other.to_string()),
            None => Self::Other("none".to_string()),
        }
    }

    /// Only a length cut asks for a continuation; any other reason ends the turn.
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Length)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionReply {
    pub content: String,
    pub stop: StopSignal,
}

impl CompletionReply {
    pub fn new(content: impl Into<String>, stop: StopSignal) -> Self {
        Self {
            content: content.into(),
            stop,
        }
    }
}

/// Sampling parameters sent with every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub temperature: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub max_tokens: usize,
}

/// A chat completion backend
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionService: Send + Sync {
    /// Send the whole conversation and return the model's next turn.
    /// `model` is the model or deployment name the request is addressed to.
    async fn complete(
        &self,
        messages: &[ConversationMessage],
        model: &str,
        params: &SamplingParams,
    ) -> Result<CompletionReply>;
}

/// Factory for creating completion backends
pub struct CompletionFactory;

impl CompletionFactory {
    pub fn create_service(config: &TranslateConfig) -> Result<Arc<dyn CompletionService>> {
        Ok(Arc::new(OpenAiClient::from_config(config)?))
    }
}
