use crate::types::LLMChunk;
use async_trait::async_trait;
use chat_core::{GenerationSettings, Message, ModelConfig};
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LLMError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("Request timed out: {0}")]
    Timeout(String),
}

impl LLMError {
    /// Classify a transport failure, separating timeouts from other HTTP errors.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LLMError::Timeout(err.to_string())
        } else {
            LLMError::Http(err)
        }
    }
}

pub type Result<T> = std::result::Result<T, LLMError>;

pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMChunk>> + Send>>;

/// Transport for streamed chat completions.
///
/// Dropping the returned stream aborts the underlying request.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Stream a completion for `messages` (already trimmed) against `model`.
    ///
    /// The system prompt and sampling parameters come from `settings`.
    async fn chat_stream(
        &self,
        model: &ModelConfig,
        messages: &[Message],
        settings: &GenerationSettings,
    ) -> Result<LLMStream>;

    /// List model ids served by the endpoint of `model`
    async fn list_models(&self, _model: &ModelConfig) -> Result<Vec<String>> {
        Ok(vec![])
    }

    /// Check that the endpoint of `model` is reachable
    async fn test_connection(&self, model: &ModelConfig) -> Result<()> {
        self.list_models(model).await.map(|_| ())
    }
}
