//! Embedding provider contract and the HTTP client implementation.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Classify, EmbeddingError, ErrorClass};
use crate::models::EmbeddingConfig;

/// External embedding provider. Both operations are fallible per item; a
/// batch failure is reported for every item rather than aborting callers
/// that track per-chunk outcomes.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    /// Embed a batch, returning one outcome per input text.
    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let mut outcomes = Vec::with_capacity(texts.len());
        for text in texts {
            outcomes.push(self.embed(text).await);
        }
        outcomes
    }
}

/// Request body for the /embed endpoint.
#[derive(Debug, Serialize)]
struct EmbedRequest {
    inputs: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    truncate: Option<bool>,
}

/// Response from the /embed endpoint.
#[derive(Debug, Deserialize)]
struct EmbedResponse(Vec<Vec<f32>>);

/// Client for an HTTP embedding server exposing a batched /embed endpoint.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingProvider {
    client: Client,
    base_url: String,
    batch_size: usize,
}

impl HttpEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::ConnectionError(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size as usize,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let expected = texts.len();
        let url = format!("{}/embed", self.base_url);
        let request = EmbedRequest {
            inputs: texts,
            truncate: Some(true),
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbeddingError::Timeout
                } else {
                    EmbeddingError::RequestError(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 422 || status.as_u16() == 400 {
                return Err(EmbeddingError::RejectedInput(body));
            }
            return Err(EmbeddingError::ServerError {
                status: status.as_u16(),
                message: body,
            });
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

        if embed_response.0.len() != expected {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                expected,
                embed_response.0.len()
            )));
        }

        Ok(embed_response.0)
    }

    /// Fan a whole-batch transport failure out as one error per input.
    fn replicate_error(error: &EmbeddingError, count: usize) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let message = error.to_string();
        (0..count)
            .map(|_| {
                Err(match error.class() {
                    ErrorClass::Transient => EmbeddingError::ConnectionError(message.clone()),
                    ErrorClass::Permanent => EmbeddingError::RejectedInput(message.clone()),
                })
            })
            .collect()
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.post_batch(vec![text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("empty embedding response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<Result<Vec<f32>, EmbeddingError>> {
        let mut outcomes = Vec::with_capacity(texts.len());

        for window in texts.chunks(self.batch_size.max(1)) {
            match self.post_batch(window.to_vec()).await {
                Ok(vectors) => outcomes.extend(vectors.into_iter().map(Ok)),
                Err(e) => outcomes.extend(Self::replicate_error(&e, window.len())),
            }
        }

        outcomes
    }
}
