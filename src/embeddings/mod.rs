
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::EmbeddingConfig;

const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Maps text to a fixed-dimension vector.
///
/// Implementations must tolerate provider errors by returning `None` rather
/// than failing: callers treat a missing embedding as "no semantic signal
/// available" and degrade to keyword matching.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Option<Vec<f32>>;
}

/// Encode an embedding as little-endian f32 bytes for BLOB storage
#[inline]
pub fn encode_embedding(vector: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vector.len() * 4);
    for value in vector {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into an embedding.
///
/// Trailing bytes that do not form a full f32 are ignored.
#[inline]
pub fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    prompt: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

/// Ollama-compatible embedding client
#[derive(Debug, Clone)]
pub struct OllamaEmbeddings {
    endpoint: Url,
    model: String,
    client: reqwest::Client,
    retry_attempts: u32,
}

impl OllamaEmbeddings {
    #[inline]
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let endpoint = config.endpoint_url()?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            endpoint,
            model: config.model.clone(),
            client,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    async fn request_embedding(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let url = self.endpoint.join("/api/embed")?;
        let request = EmbedRequest {
            model: self.model.clone(),
            prompt: text.to_string(),
        };

        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("Embedding request attempt {}/{}", attempt, self.retry_attempts);

            match self.client.post(url.clone()).json(&request).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed: EmbedResponse = response.json().await?;
                        debug!("Generated embedding with {} dimensions", parsed.embedding.len());
                        return Ok(parsed.embedding);
                    }
                    if status.is_server_error() {
                        warn!(
                            "Embedding server error (status {}), attempt {}/{}",
                            status, attempt, self.retry_attempts
                        );
                        last_error = Some(anyhow::anyhow!("Server error: HTTP {}", status));
                    } else {
                        return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                    }
                }
                Err(error) => {
                    warn!(
                        "Embedding transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(error.into());
                }
            }

            if attempt < self.retry_attempts {
                let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Embedding request failed after retries")))
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    #[inline]
    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        if text.trim().is_empty() {
            return None;
        }

        match self.request_embedding(text).await {
            Ok(embedding) if !embedding.is_empty() => Some(embedding),
            Ok(_) => {
                warn!("Embedding provider returned an empty vector");
                None
            }
            Err(error) => {
                warn!("Embedding generation failed, continuing without: {}", error);
                None
            }
        }
    }
}
