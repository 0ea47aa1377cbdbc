//! Embedding providers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;

use crate::config::{ProviderBackend, ProviderConfig};

/// Fixed-dimension text embedder.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

pub struct OllamaEmbedder {
    client: ollama_rs::Ollama,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(client: ollama_rs::Ollama, model: impl Into<String>) -> Self {
        Self { client, model: model.into() }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};

        let request = GenerateEmbeddingsRequest::new(self.model.clone(), EmbeddingsInput::Multiple(texts));
        let res = self.client.generate_embeddings(request).await?;
        Ok(res.embeddings)
    }
}

pub struct OpenAICompatibleEmbedder {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl OpenAICompatibleEmbedder {
    pub fn new(base_url: String, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAICompatibleEmbedder {
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let body = json!({ "model": self.model, "input": texts });

        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')))
            .json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await?.error_for_status()?;
        let json: serde_json::Value = res.json().await?;
        let data = json["data"].as_array().context("No 'data' array in embeddings response")?;

        // Results carry an index; do not trust response order.
        let mut indexed: Vec<(usize, Vec<f32>)> = data
            .iter()
            .enumerate()
            .map(|(pos, item)| {
                let index = item["index"].as_u64().map(|i| i as usize).unwrap_or(pos);
                let vector = item["embedding"]
                    .as_array()
                    .context("Embedding item without vector")?
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect();
                Ok((index, vector))
            })
            .collect::<Result<_>>()?;
        indexed.sort_by_key(|(i, _)| *i);

        Ok(indexed.into_iter().map(|(_, v)| v).collect())
    }
}

pub fn embedder_from_config(config: &ProviderConfig) -> Arc<dyn EmbeddingProvider> {
    match config.backend {
        ProviderBackend::Ollama => Arc::new(OllamaEmbedder::new(ollama_rs::Ollama::default(), config.embedding_model.clone())),
        ProviderBackend::OpenaiCompatible => {
            let api_key = std::env::var(&config.api_key_env).ok();
            Arc::new(OpenAICompatibleEmbedder::new(config.base_url.clone(), api_key, config.embedding_model.clone()))
        }
    }
}
