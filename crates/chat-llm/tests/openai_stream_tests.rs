use chat_core::{GenerationSettings, Message, ModelConfig};
use chat_llm::{LLMChunk, LLMError, LLMProvider, OpenAICompatProvider};
use futures::StreamExt;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn network_tests_disabled() -> bool {
    std::env::var_os("CODEX_SANDBOX_NETWORK_DISABLED").is_some()
}

fn model_for(server: &MockServer) -> ModelConfig {
    // Trailing slash on purpose: the provider must not double it.
    ModelConfig::new(format!("{}/v1/", server.uri()), "test-model").with_api_key("sk-test")
}

fn sse(chunks: &[&str]) -> String {
    chunks
        .iter()
        .map(|chunk| format!("data: {chunk}\n\n"))
        .collect()
}

fn delta(content: &str) -> String {
    json!({"choices": [{"delta": {"content": content}, "finish_reason": null}]}).to_string()
}

async fn collect_tokens(provider: &OpenAICompatProvider, model: &ModelConfig) -> Vec<LLMChunk> {
    let stream = provider
        .chat_stream(model, &[Message::user("c1", "Hi")], &GenerationSettings::default())
        .await
        .expect("stream");
    stream.map(|item| item.expect("chunk")).collect().await
}

#[tokio::test]
async fn streams_tokens_in_order_until_done() {
    if network_tests_disabled() {
        return;
    }

    let server = MockServer::start().await;
    let first = delta("Hel");
    let second = delta("lo");
    let body = sse(&[&first, "{broken", &second, "[DONE]"]);

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("Authorization", "Bearer sk-test"))
        .and(header("Accept", "text/event-stream"))
        .and(body_partial_json(json!({"model": "test-model", "stream": true})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(body),
        )
        .expect(1)
        .mount(&server)
        .await;

    let provider = OpenAICompatProvider::new().unwrap();
    let chunks = collect_tokens(&provider, &model_for(&server)).await;

    assert_eq!(
        chunks,
        vec![
            LLMChunk::Token("Hel".to_string()),
            LLMChunk::Token("lo".to_string()),
            LLMChunk::Done
        ]
    );
}

#[tokio::test]
async fn non_success_status_is_an_api_error_with_body() {
    if network_tests_disabled() {
        return;
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("invalid key"))
        .mount(&server)
        .await;

    let provider = OpenAICompatProvider::new().unwrap();
    let result = provider
        .chat_stream(
            &model_for(&server),
            &[Message::user("c1", "Hi")],
            &GenerationSettings::default(),
        )
        .await;

    match result {
        Err(LLMError::Api(message)) => {
            assert!(message.starts_with("HTTP 401"));
            assert!(message.contains("invalid key"));
        }
        Err(other) => panic!("expected API error, got {other:?}"),
        Ok(_) => panic!("expected API error, got a stream"),
    }
}

#[tokio::test]
async fn request_without_api_key_still_streams() {
    if network_tests_disabled() {
        return;
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(sse(&["[DONE]"])),
        )
        .mount(&server)
        .await;

    let mut model = model_for(&server);
    model.api_key = None;
    let provider = OpenAICompatProvider::new().unwrap();
    let chunks = collect_tokens(&provider, &model).await;
    assert_eq!(chunks, vec![LLMChunk::Done]);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let sent: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(sent["messages"][1]["content"], "Hi");
    assert_eq!(sent["temperature"], json!(0.7f32));
}

#[tokio::test]
async fn list_models_merges_formats() {
    if network_tests_disabled() {
        return;
    }

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [{"id": "a"}],
            "models": [{"name": "b", "model": "a"}]
        })))
        .mount(&server)
        .await;

    let provider = OpenAICompatProvider::new().unwrap();
    let models = provider.list_models(&model_for(&server)).await.unwrap();
    assert_eq!(models, vec!["a", "b"]);
}

#[tokio::test]
async fn connection_test_accepts_missing_models_endpoint() {
    if network_tests_disabled() {
        return;
    }

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let provider = OpenAICompatProvider::new().unwrap();
    assert!(provider.test_connection(&model_for(&server)).await.is_ok());
}

#[tokio::test]
async fn connection_test_rejects_server_errors() {
    if network_tests_disabled() {
        return;
    }

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let provider = OpenAICompatProvider::new().unwrap();
    let result = provider.test_connection(&model_for(&server)).await;
    assert!(matches!(result, Err(LLMError::Api(message)) if message.starts_with("HTTP 500")));
}
