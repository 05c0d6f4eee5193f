#[cfg(test)]
mod tests;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{GenerationConfig, LiveSearchConfig, ManagedStoreConfig};

/// An answer produced by an external provider
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeneratedAnswer {
    pub text: String,
    pub citations: Vec<String>,
}

impl GeneratedAnswer {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// One image attachment for a multimodal generation call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePart {
    pub media_type: String,
    pub data: Vec<u8>,
}

/// A generation request; text prompt plus optional image parts
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub images: Vec<ImagePart>,
}

impl GenerationRequest {
    #[inline]
    pub fn text(prompt: String) -> Self {
        Self {
            prompt,
            images: Vec::new(),
        }
    }
}

/// External generation provider wrapped by the non-cache tiers
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GeneratedAnswer>;
}

/// Provider-hosted retrieval index that performs its own chunking, ranking,
/// and generation
#[async_trait]
pub trait ManagedStoreProvider: Send + Sync {
    async fn query(&self, store_handle: &str, question: &str) -> anyhow::Result<GeneratedAnswer>;
}

/// Live web-search provider used to augment stale local context
#[async_trait]
pub trait LiveSearchProvider: Send + Sync {
    async fn search(
        &self,
        question: &str,
        context_hint: Option<&str>,
    ) -> anyhow::Result<GeneratedAnswer>;
}

fn build_client(timeout_seconds: u64) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()?)
}

/// OpenAI-compatible chat completion client.
///
/// Image parts are sent as base64 data URLs so the same endpoint serves both
/// the inline and the visual tier.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl OpenAiChatClient {
    #[inline]
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            client: build_client(config.timeout_seconds)?,
        })
    }

    fn request_body(&self, request: &GenerationRequest) -> Value {
        if request.images.is_empty() {
            return json!({
                "model": self.model,
                "messages": [{"role": "user", "content": request.prompt}],
            });
        }

        let mut parts = vec![json!({"type": "text", "text": request.prompt})];
        for image in &request.images {
            let data_url = format!(
                "data:{};base64,{}",
                image.media_type,
                BASE64.encode(&image.data)
            );
            parts.push(json!({"type": "image_url", "image_url": {"url": data_url}}));
        }

        json!({
            "model": self.model,
            "messages": [{"role": "user", "content": parts}],
        })
    }
}

#[async_trait]
impl GenerationProvider for OpenAiChatClient {
    #[inline]
    async fn generate(&self, request: &GenerationRequest) -> anyhow::Result<GeneratedAnswer> {
        let url = format!("{}/v1/chat/completions", self.endpoint);
        debug!(
            "Generation request: {} prompt chars, {} images",
            request.prompt.len(),
            request.images.len()
        );

        let mut builder = self.client.post(&url).json(&self.request_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!("Generation provider returned HTTP {}: {}", status, body);
            anyhow::bail!("Generation provider error: HTTP {status}");
        }

        let parsed: ChatResponse = response.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        Ok(GeneratedAnswer {
            text,
            citations: Vec::new(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct AnswerResponse {
    answer: String,
    #[serde(default)]
    citations: Vec<String>,
}

/// HTTP adapter for a managed retrieval store
#[derive(Debug, Clone)]
pub struct HttpManagedStore {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpManagedStore {
    #[inline]
    pub fn new(config: &ManagedStoreConfig) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client: build_client(config.timeout_seconds)?,
        })
    }
}

#[async_trait]
impl ManagedStoreProvider for HttpManagedStore {
    #[inline]
    async fn query(&self, store_handle: &str, question: &str) -> anyhow::Result<GeneratedAnswer> {
        let url = format!("{}/v1/stores/query", self.endpoint);

        let mut builder = self
            .client
            .post(&url)
            .json(&json!({"store": store_handle, "question": question}));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Managed store error: HTTP {status}");
        }

        let parsed: AnswerResponse = response.json().await?;
        Ok(GeneratedAnswer {
            text: parsed.answer,
            citations: parsed.citations,
        })
    }
}

/// HTTP adapter for a live-search provider
#[derive(Debug, Clone)]
pub struct HttpLiveSearch {
    endpoint: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpLiveSearch {
    #[inline]
    pub fn new(config: &LiveSearchConfig) -> anyhow::Result<Self> {
        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client: build_client(config.timeout_seconds)?,
        })
    }
}

#[async_trait]
impl LiveSearchProvider for HttpLiveSearch {
    #[inline]
    async fn search(
        &self,
        question: &str,
        context_hint: Option<&str>,
    ) -> anyhow::Result<GeneratedAnswer> {
        let url = format!("{}/v1/search", self.endpoint);

        let mut body = json!({"query": question});
        if let Some(hint) = context_hint {
            body["context"] = json!(hint);
        }

        let mut builder = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Live search error: HTTP {status}");
        }

        let parsed: AnswerResponse = response.json().await?;
        Ok(GeneratedAnswer {
            text: parsed.answer,
            citations: parsed.citations,
        })
    }
}
