use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CompletionReply, CompletionService, SamplingParams, StopSignal};
use crate::config::{ProviderKind, TranslateConfig};
use crate::conversation::ConversationMessage;
use crate::error::{Result, TranslatorError};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: &'a [ConversationMessage],
    temperature: f32,
    max_tokens: usize,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Chat completions over HTTP, against OpenAI or an Azure OpenAI resource
pub struct OpenAiClient {
    client: Client,
    provider: ProviderKind,
    endpoint: String,
    api_version: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(provider: ProviderKind, endpoint: &str, api_version: &str, api_key: String) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            provider,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: api_version.to_string(),
            api_key,
        })
    }

    /// Build a client reading the API key from the configured environment variable
    pub fn from_config(config: &TranslateConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            TranslatorError::Config(format!("Environment variable {} is not set", config.api_key_env))
        })?;
        Self::new(config.provider, &config.endpoint, &config.api_version, api_key)
    }

    fn url(&self, model: &str) -> String {
        match self.provider {
            ProviderKind::OpenAi => format!("{}/v1/chat/completions", self.endpoint),
            ProviderKind::Azure => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.endpoint, model, self.api_version
            ),
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(
        &self,
        messages: &[ConversationMessage],
        model: &str,
        params: &SamplingParams,
    ) -> Result<CompletionReply> {
        let url = self.url(model);
        let body = ChatCompletionRequest {
            // Azure addresses the deployment in the URL instead
            model: matches!(self.provider, ProviderKind::OpenAi).then_some(model),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
        };

        let request = self.client.post(&url).json(&body);
        let request = match self.provider {
            ProviderKind::OpenAi => request.bearer_auth(&self.api_key),
            ProviderKind::Azure => request.header("api-key", &self.api_key),
        };

        debug!("POST {} with {} messages", url, messages.len());
        let response = request
            .send()
            .await
            .map_err(|e| TranslatorError::Transport(format!("Failed to reach {}: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TranslatorError::Transport(format!(
                "Completion request failed {}: {}",
                status, error_text
            )));
        }

        let response_text = response
            .text()
            .await
            .map_err(|e| TranslatorError::Transport(format!("Failed to read response: {}", e)))?;

        parse_response(&response_text)
    }
}

fn parse_response(body: &str) -> Result<CompletionReply> {
    let response: ChatCompletionResponse = serde_json::from_str(body)
        .map_err(|e| TranslatorError::Transport(format!("Malformed completion response: {}", e)))?;

    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| TranslatorError::Transport("Completion response has no choices".to_string()))?;

    Ok(CompletionReply {
        content: choice.message.content.unwrap_or_default(),
        stop: StopSignal::from_finish_reason(choice.finish_reason.as_deref()),
    })
}
