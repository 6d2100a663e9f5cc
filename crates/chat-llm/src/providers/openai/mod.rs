use std::time::Duration;

use async_trait::async_trait;
use chat_core::{GenerationSettings, Message, ModelConfig};
use reqwest::{Client, RequestBuilder, StatusCode};

use crate::provider::{LLMError, LLMProvider, LLMStream, Result};

use super::common::openai_compat::{
    build_openai_compat_body, parse_models_response, parse_openai_compat_sse_data,
};
use super::common::sse::llm_stream_from_sse;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const READ_TIMEOUT: Duration = Duration::from_secs(120);

/// Streams chat completions from any OpenAI-compatible server
/// (OpenAI, llama.cpp, vLLM, Ollama, ...). Endpoint and credentials come
/// from the [`ModelConfig`] of each call, so one provider serves every model.
pub struct OpenAICompatProvider {
    client: Client,
}

impl OpenAICompatProvider {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn authorized(&self, builder: RequestBuilder, model: &ModelConfig) -> RequestBuilder {
        match model.api_key.as_deref().filter(|key| !key.is_empty()) {
            Some(key) => builder.header("Authorization", format!("Bearer {}", key)),
            None => builder,
        }
    }
}

fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}

#[async_trait]
impl LLMProvider for OpenAICompatProvider {
    async fn chat_stream(
        &self,
        model: &ModelConfig,
        messages: &[Message],
        settings: &GenerationSettings,
    ) -> Result<LLMStream> {
        let body = build_openai_compat_body(model, messages, settings);
        log::debug!(
            "Streaming {} messages to {} ({})",
            messages.len(),
            model.base_url,
            model.model_name
        );

        let request = self
            .client
            .post(endpoint(&model.base_url, "chat/completions"))
            .header("Accept", "text/event-stream")
            .json(&body);

        let response = self
            .authorized(request, model)
            .send()
            .await
            .map_err(LLMError::from_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LLMError::Api(format!("HTTP {}: {}", status.as_u16(), text)));
        }

        Ok(llm_stream_from_sse(response, |data| {
            Ok(parse_openai_compat_sse_data(data))
        }))
    }

    async fn list_models(&self, model: &ModelConfig) -> Result<Vec<String>> {
        let request = self.client.get(endpoint(&model.base_url, "models"));
        let response = self
            .authorized(request, model)
            .send()
            .await
            .map_err(LLMError::from_transport)?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(LLMError::Api(format!(
                "HTTP {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("")
            )));
        }

        let body = response.text().await?;
        Ok(parse_models_response(&body)?)
    }

    /// Reachable means `/models` answered 2xx (any body) or 404.
    async fn test_connection(&self, model: &ModelConfig) -> Result<()> {
        let request = self.client.get(endpoint(&model.base_url, "models"));
        let response = self
            .authorized(request, model)
            .send()
            .await
            .map_err(LLMError::from_transport)?;

        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            return Ok(());
        }
        Err(LLMError::Api(format!(
            "HTTP {}: {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or("")
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_trims_trailing_slashes() {
        assert_eq!(
            endpoint("http://localhost:8080/v1/", "chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(endpoint("http://host/v1", "models"), "http://host/v1/models");
    }

    #[test]
    fn provider_builds_with_default_timeouts() {
        assert!(OpenAICompatProvider::new().is_ok());
    }
}
