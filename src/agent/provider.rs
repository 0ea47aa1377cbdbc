//! Text-generation providers.
//!
//! `LLMProvider` is the raw capability: one prompt in, one completion out.
//! `Generator` binds a provider to a model and a [`RetryPolicy`], and is what
//! every policy, reflector and judge actually calls.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::{AgentResult, RetryPolicy};
use crate::config::{ProviderBackend, ProviderConfig};

#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String>;
}

pub struct OllamaProvider {
    client: ollama_rs::Ollama,
}

impl OllamaProvider {
    pub fn new(client: ollama_rs::Ollama) -> Self {
        Self { client }
    }
}

#[async_trait]
impl LLMProvider for OllamaProvider {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String> {
        use ollama_rs::generation::chat::{request::ChatMessageRequest, ChatMessage};

        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(ChatMessage::system(sys));
        }
        messages.push(ChatMessage::user(prompt));

        let res = self
            .client
            .send_chat_messages(ChatMessageRequest::new(model.to_string(), messages))
            .await?;

        Ok(res.message.content)
    }
}

pub struct OpenAICompatibleProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    temperature: f32,
}

impl OpenAICompatibleProvider {
    pub fn new(base_url: String, api_key: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url,
            api_key,
            temperature: 0.7,
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl LLMProvider for OpenAICompatibleProvider {
    async fn generate(&self, model: &str, prompt: String, system: Option<String>) -> Result<String> {
        let mut messages = Vec::new();
        if let Some(sys) = system {
            messages.push(json!({ "role": "system", "content": sys }));
        }
        messages.push(json!({ "role": "user", "content": prompt }));

        let body = json!({
            "model": model,
            "messages": messages,
            "temperature": self.temperature,
        });

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .json(&body);

        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await?.error_for_status()?;
        let json: serde_json::Value = res.json().await?;

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .context("Failed to parse content from OpenAI response")?;

        Ok(content.to_string())
    }
}

/// Build the configured backend.
pub fn provider_from_config(config: &ProviderConfig) -> Arc<dyn LLMProvider> {
    match config.backend {
        ProviderBackend::Ollama => Arc::new(OllamaProvider::new(ollama_rs::Ollama::default())),
        ProviderBackend::OpenaiCompatible => {
            let api_key = std::env::var(&config.api_key_env).ok();
            Arc::new(OpenAICompatibleProvider::new(config.base_url.clone(), api_key))
        }
    }
}

/// A provider bound to one model, with retries.
#[derive(Clone)]
pub struct Generator {
    provider: Arc<dyn LLMProvider>,
    model: String,
    retry: RetryPolicy,
}

impl Generator {
    pub fn new(provider: Arc<dyn LLMProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Generate with retries; `call` names the purpose for error context.
    pub async fn generate(&self, call: &str, prompt: String, system: Option<String>) -> AgentResult<String> {
        debug!("{} -> {} ({} prompt bytes)", call, self.model, prompt.len());
        self.retry
            .run(call, || {
                let provider = self.provider.clone();
                let model = self.model.clone();
                let prompt = prompt.clone();
                let system = system.clone();
                async move { provider.generate(&model, prompt, system).await }
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl LLMProvider for CountingProvider {
        async fn generate(&self, model: &str, prompt: String, _system: Option<String>) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                anyhow::bail!("503 from {}", model);
            }
            Ok(format!("{}:{}", model, prompt))
        }
    }

    #[tokio::test]
    async fn test_generator_retries_then_answers() {
        let provider = Arc::new(CountingProvider { calls: AtomicUsize::new(0), fail_first: 1 });
        let retry = RetryPolicy { max_attempts: 2, ..RetryPolicy::immediate() };
        let generator = Generator::new(provider.clone(), "m").with_retry(retry);

        let out = generator.generate("advisor", "hi".into(), None).await.unwrap();
        assert_eq!(out, "m:hi");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_generator_surfaces_provider_error() {
        let provider = Arc::new(CountingProvider { calls: AtomicUsize::new(0), fail_first: usize::MAX });
        let generator = Generator::new(provider, "m").with_retry(RetryPolicy::immediate());

        let err = generator.generate("judge_rule_value", "x".into(), None).await.unwrap_err();
        assert!(matches!(err, AgentError::Provider { ref call, .. } if call == "judge_rule_value"));
    }
}
