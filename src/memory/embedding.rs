use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Embedder;
use crate::config::Config;
use crate::error::{Result, TranslatorError};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// OpenAI-compatible `/v1/embeddings` client
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    api_key: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(endpoint: &str, model: &str, api_key: String, dimensions: usize) -> Result<Self> {
        Ok(Self {
            client: Client::builder().build()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model: model.to_string(),
            api_key,
            dimensions,
        })
    }

    /// Uses the completion API key with the `[memory]` embedding settings
    pub fn from_config(config: &Config) -> Result<Self> {
        let api_key = std::env::var(&config.translate.api_key_env).map_err(|_| {
            TranslatorError::Config(format!("Environment variable {} is not set", config.translate.api_key_env))
        })?;
        Self::new(
            &config.memory.embedding_endpoint,
            &config.memory.embedding_model,
            api_key,
            config.memory.vector_dim,
        )
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.endpoint);
        debug!("Embedding {} text(s) with {}", texts.len(), self.model);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| TranslatorError::Transport(format!("Failed to reach {}: {}", url, e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(TranslatorError::Transport(format!("Embedding request failed {}: {}", status, error_text)));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TranslatorError::Transport(format!("Failed to read response: {}", e)))?;
        parse_embeddings(&body, texts.len(), self.dimensions)
    }
}

fn parse_embeddings(body: &str, expected: usize, dimensions: usize) -> Result<Vec<Vec<f32>>> {
    let mut response: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| TranslatorError::Transport(format!("Malformed embedding response: {}", e)))?;

    if response.data.len() != expected {
        return Err(TranslatorError::Transport(format!(
            "Asked for {} embeddings, got {}",
            expected,
            response.data.len()
        )));
    }
    if let Some(item) = response.data.iter().find(|item| item.embedding.len() != dimensions) {
        return Err(TranslatorError::Transport(format!(
            "Embedding has {} dimensions, the index expects {}",
            item.embedding.len(),
            dimensions
        )));
    }

    response.data.sort_by_key(|item| item.index);
    Ok(response.data.into_iter().map(|item| item.embedding).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embeddings_are_returned_in_input_order() {
        let body = r#"{"data":[{"index":1,"embedding":[0.3,0.4]},{"index":0,"embedding":[0.1,0.2]}]}"#;
        let vectors = parse_embeddings(body, 2, 2).unwrap();
        assert_eq!(vectors, vec![vec![0.1, 0.2], vec![0.3, 0.4]]);
    }

    #[test]
    fn test_dimension_mismatch_is_rejected() {
        let body = r#"{"data":[{"index":0,"embedding":[0.1,0.2,0.3]}]}"#;
        assert!(matches!(parse_embeddings(body, 1, 2), Err(TranslatorError::Transport(_))));
    }

    #[test]
    fn test_count_mismatch_is_rejected() {
        let body = r#"{"data":[{"index":0,"embedding":[0.1]}]}"#;
        assert!(parse_embeddings(body, 2, 1).is_err());
    }
}
