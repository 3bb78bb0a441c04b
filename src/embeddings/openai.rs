// src/embeddings/openai.rs
// OpenAI embeddings API client

use crate::error::{KingfisherError, Result};
use crate::embeddings::Embedder;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Max characters to embed per text (truncate longer text)
const MAX_TEXT_CHARS: usize = 8000;
/// Max texts per API request
const MAX_BATCH_SIZE: usize = 100;
/// HTTP timeout
const TIMEOUT_SECS: u64 = 30;
/// Retry attempts for transient failures
const RETRY_ATTEMPTS: usize = 2;
/// API endpoint
const API_URL: &str = "https://api.openai.com/v1/embeddings";

/// Supported embedding models
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum EmbeddingModel {
    /// text-embedding-3-small: 1536 dimensions (recommended)
    #[default]
    TextEmbedding3Small,
    /// text-embedding-3-large: 3072 dimensions
    TextEmbedding3Large,
}

impl EmbeddingModel {
    pub fn model_name(&self) -> &'static str {
        match self {
            Self::TextEmbedding3Small => "text-embedding-3-small",
            Self::TextEmbedding3Large => "text-embedding-3-large",
        }
    }

    pub fn dimensions(&self) -> usize {
        match self {
            Self::TextEmbedding3Small => 1536,
            Self::TextEmbedding3Large => 3072,
        }
    }
}

/// OpenAI embeddings client
pub struct OpenAiEmbeddings {
    api_key: String,
    model: EmbeddingModel,
    http_client: reqwest::Client,
}

impl OpenAiEmbeddings {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, EmbeddingModel::default())
    }

    pub fn with_model(api_key: String, model: EmbeddingModel) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_key,
            model,
            http_client,
        }
    }

    fn truncate(text: &str) -> &str {
        match text.char_indices().nth(MAX_TEXT_CHARS) {
            Some((idx, _)) => &text[..idx],
            None => text,
        }
    }

    async fn embed_batch_inner(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let inputs: Vec<&str> = texts.iter().map(|t| Self::truncate(t)).collect();
        let body = serde_json::json!({
            "model": self.model.model_name(),
            "input": inputs
        });

        let mut last_error: Option<KingfisherError> = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
            }

            let response = match self
                .http_client
                .post(API_URL)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(e.into());
                    continue;
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                let snippet: String = text.chars().take(200).collect();
                last_error = Some(KingfisherError::Embedding(format!(
                    "API error {status}: {snippet}"
                )));
                if status.as_u16() == 429 || status.is_server_error() {
                    continue;
                }
                break;
            }

            let json: serde_json::Value = response.json().await?;
            let data = json["data"].as_array().ok_or_else(|| {
                KingfisherError::Embedding("invalid embeddings response".into())
            })?;

            // Responses carry an index field; sort to preserve input order
            let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
            for item in data {
                let index = item["index"].as_u64().unwrap_or(0) as usize;
                let Some(values) = item["embedding"].as_array() else {
                    continue;
                };
                let vector: Vec<f32> = values
                    .iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect();
                indexed.push((index, vector));
            }
            indexed.sort_by_key(|(i, _)| *i);

            let vectors: Vec<Vec<f32>> = indexed.into_iter().map(|(_, v)| v).collect();
            if vectors.len() != texts.len() {
                return Err(KingfisherError::Embedding(format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    vectors.len()
                )));
            }
            return Ok(vectors);
        }

        Err(last_error
            .unwrap_or_else(|| KingfisherError::Embedding("unknown embedding error".into())))
    }
}

#[async_trait]
impl Embedder for OpenAiEmbeddings {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let chunks: Vec<&[String]> = texts.chunks(MAX_BATCH_SIZE).collect();
        if chunks.len() > 1 {
            debug!(
                texts = texts.len(),
                batches = chunks.len(),
                "embedding in multiple batches"
            );
        }

        let mut all = Vec::with_capacity(texts.len());
        for chunk in chunks {
            all.extend(self.embed_batch_inner(chunk).await?);
        }
        Ok(all)
    }

    fn dimensions(&self) -> usize {
        self.model.dimensions()
    }

    fn model_name(&self) -> String {
        self.model.model_name().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_dimensions() {
        assert_eq!(EmbeddingModel::TextEmbedding3Small.dimensions(), 1536);
        assert_eq!(EmbeddingModel::TextEmbedding3Large.dimensions(), 3072);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let long = "字".repeat(MAX_TEXT_CHARS + 100);
        let truncated = OpenAiEmbeddings::truncate(&long);
        assert_eq!(truncated.chars().count(), MAX_TEXT_CHARS);
    }
}
