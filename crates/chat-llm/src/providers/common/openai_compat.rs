//! OpenAI-compatible request building and stream chunk parsing.
//!
//! Messages are serialized with their displayed answer only; ids,
//! timestamps, stored alternatives and reasoning never leave the client.

use chat_core::{GenerationSettings, Message, ModelConfig, Role};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::types::LLMChunk;

/// Assistant prefill that closes reasoning before it starts.
pub const SKIP_THINKING_PREFILL: &str = "<think>\n</think>\n";

fn message_json(role: Role, content: &str, image_data: Option<&str>) -> Value {
    match image_data {
        Some(url) => json!({
            "role": role.as_str(),
            "content": [
                { "type": "text", "text": content },
                { "type": "image_url", "image_url": { "url": url, "detail": "auto" } },
            ],
        }),
        None => json!({
            "role": role.as_str(),
            "content": content,
        }),
    }
}

/// Convert history to the OpenAI `messages` array.
///
/// Images are attached as multi-part content only when `model` accepts them.
pub fn messages_to_openai_compat_json(model: &ModelConfig, messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let image = if model.supports_vision {
                m.image_data.as_deref()
            } else {
                None
            };
            message_json(m.role, m.display_content(), image)
        })
        .collect()
}

/// Build a streaming chat completion body.
///
/// Layout: optional system prompt, the history, then the skip-thinking
/// prefill when the model reasons by default but thinking is turned off.
/// Sampling parameters are included only when set.
pub fn build_openai_compat_body(
    model: &ModelConfig,
    messages: &[Message],
    settings: &GenerationSettings,
) -> Value {
    let mut all_messages = Vec::with_capacity(messages.len() + 2);
    if !settings.system_prompt.trim().is_empty() {
        all_messages.push(message_json(Role::System, &settings.system_prompt, None));
    }
    all_messages.extend(messages_to_openai_compat_json(model, messages));
    if model.supports_thinking && !settings.thinking_enabled {
        all_messages.push(message_json(Role::Assistant, SKIP_THINKING_PREFILL, None));
    }

    let mut body = Map::new();
    body.insert("model".to_string(), json!(model.model_name));
    body.insert("messages".to_string(), Value::Array(all_messages));
    body.insert("stream".to_string(), json!(true));

    let sampling = &settings.sampling;
    let optional = [
        ("temperature", sampling.temperature.map(|v| json!(v))),
        ("top_p", sampling.top_p.map(|v| json!(v))),
        ("top_k", sampling.top_k.map(|v| json!(v))),
        ("min_p", sampling.min_p.map(|v| json!(v))),
        ("presence_penalty", sampling.presence_penalty.map(|v| json!(v))),
        ("frequency_penalty", sampling.frequency_penalty.map(|v| json!(v))),
        ("repetition_penalty", sampling.repetition_penalty.map(|v| json!(v))),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            body.insert(key.to_string(), value);
        }
    }

    Value::Object(body)
}

// --- streaming chunk parsing ---

#[derive(Debug, Deserialize)]
struct OpenAICompatStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAICompatChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAICompatChoice {
    #[serde(default)]
    delta: OpenAICompatDelta,
}

#[derive(Debug, Deserialize, Default)]
struct OpenAICompatDelta {
    content: Option<String>,
}

/// Parse one SSE `data:` payload.
///
/// - `"[DONE]"` -> `Some(LLMChunk::Done)`
/// - first choice with non-empty delta content -> `Some(LLMChunk::Token)`
/// - anything else, malformed JSON included -> `None`
pub fn parse_openai_compat_sse_data(data: &str) -> Option<LLMChunk> {
    let data = data.trim();
    if data == "[DONE]" {
        return Some(LLMChunk::Done);
    }

    let chunk = match serde_json::from_str::<OpenAICompatStreamChunk>(data) {
        Ok(chunk) => chunk,
        Err(e) => {
            log::debug!("Skipping malformed stream chunk: {}", e);
            return None;
        }
    };

    chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty())
        .map(LLMChunk::Token)
}

// --- model listing ---

#[derive(Debug, Deserialize, Default)]
struct ModelsResponse {
    /// OpenAI format
    #[serde(default)]
    data: Option<Vec<OpenAIModel>>,
    /// Ollama format
    #[serde(default)]
    models: Option<Vec<OllamaModel>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIModel {
    id: String,
}

#[derive(Debug, Deserialize)]
struct OllamaModel {
    name: Option<String>,
    model: Option<String>,
}

/// Model ids from a `/models` body in OpenAI or Ollama shape, deduplicated in
/// first-seen order.
pub fn parse_models_response(body: &str) -> serde_json::Result<Vec<String>> {
    let response: ModelsResponse = serde_json::from_str(body)?;

    let openai = response.data.unwrap_or_default().into_iter().map(|m| m.id);
    let ollama = response
        .models
        .unwrap_or_default()
        .into_iter()
        .flat_map(|m| [m.name, m.model])
        .flatten();

    let mut ids: Vec<String> = Vec::new();
    for id in openai.chain(ollama) {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_core::SamplingParams;

    fn model() -> ModelConfig {
        ModelConfig::new("http://localhost:8080/v1", "local-model")
    }

    #[test]
    fn body_prepends_system_prompt_and_streams() {
        let messages = vec![Message::user("c1", "Hello")];
        let body = build_openai_compat_body(&model(), &messages, &GenerationSettings::default());

        assert_eq!(body["model"], "local-model");
        assert_eq!(body["stream"], true);
        let sent = body["messages"].as_array().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0]["role"], "system");
        assert_eq!(sent[0]["content"], "You are a helpful assistant.");
        assert_eq!(sent[1], json!({"role": "user", "content": "Hello"}));
    }

    #[test]
    fn blank_system_prompt_is_omitted() {
        let settings = GenerationSettings {
            system_prompt: "  ".to_string(),
            ..Default::default()
        };
        let body = build_openai_compat_body(&model(), &[Message::user("c1", "Hi")], &settings);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn only_enabled_sampling_params_are_sent() {
        let mut settings = GenerationSettings::default();
        settings.sampling = SamplingParams {
            top_k: Some(40),
            repetition_penalty: Some(1.1),
            ..SamplingParams::disabled()
        };

        let body = build_openai_compat_body(&model(), &[], &settings);
        let object = body.as_object().unwrap();
        assert!(!object.contains_key("temperature"));
        assert!(!object.contains_key("top_p"));
        assert_eq!(body["top_k"], 40);
        assert!(object.contains_key("repetition_penalty"));
    }

    #[test]
    fn default_settings_send_temperature() {
        let body = build_openai_compat_body(&model(), &[], &GenerationSettings::default());
        assert!(body["temperature"].is_number());
    }

    #[test]
    fn thinking_model_with_thinking_off_gets_prefill() {
        let thinking_model = model().with_thinking(true);
        let body = build_openai_compat_body(
            &thinking_model,
            &[Message::user("c1", "Hi")],
            &GenerationSettings::default(),
        );
        let sent = body["messages"].as_array().unwrap();
        let last = sent.last().unwrap();
        assert_eq!(last["role"], "assistant");
        assert_eq!(last["content"], SKIP_THINKING_PREFILL);

        let enabled = GenerationSettings {
            thinking_enabled: true,
            ..Default::default()
        };
        let body = build_openai_compat_body(&thinking_model, &[Message::user("c1", "Hi")], &enabled);
        assert_eq!(body["messages"].as_array().unwrap().last().unwrap()["role"], "user");
    }

    #[test]
    fn images_are_multipart_only_for_vision_models() {
        let messages = vec![Message::user("c1", "What is this?").with_image("data:image/png;base64,AAA")];

        let plain = messages_to_openai_compat_json(&model(), &messages);
        assert_eq!(plain[0]["content"], "What is this?");

        let vision = messages_to_openai_compat_json(&model().with_vision(true), &messages);
        let parts = vision[0]["content"].as_array().unwrap();
        assert_eq!(parts[0], json!({"type": "text", "text": "What is this?"}));
        assert_eq!(parts[1]["image_url"]["url"], "data:image/png;base64,AAA");
        assert_eq!(parts[1]["image_url"]["detail"], "auto");
    }

    #[test]
    fn selected_alternative_is_what_gets_sent() {
        let mut answer = Message::assistant("c1", "A");
        answer.alternatives.push(chat_core::MessageAlternative::new("B", None));
        answer.current_alternative_index = 1;

        let json = messages_to_openai_compat_json(&model(), &[answer]);
        assert_eq!(json[0]["content"], "B");
        assert!(json[0].get("id").is_none());
    }

    #[test]
    fn parses_delta_content_and_done() {
        let data = r#"{"id":"chatcmpl-1","choices":[{"delta":{"content":"Hel"},"finish_reason":null}]}"#;
        assert_eq!(parse_openai_compat_sse_data(data), Some(LLMChunk::Token("Hel".to_string())));
        assert_eq!(parse_openai_compat_sse_data(" [DONE] "), Some(LLMChunk::Done));
    }

    #[test]
    fn skips_malformed_and_empty_chunks() {
        assert_eq!(parse_openai_compat_sse_data("{not json"), None);
        assert_eq!(parse_openai_compat_sse_data(r#"{"choices":[]}"#), None);
        assert_eq!(parse_openai_compat_sse_data(r#"{"choices":[{"delta":{}}]}"#), None);
        assert_eq!(
            parse_openai_compat_sse_data(r#"{"choices":[{"delta":{"role":"assistant","content":""}}]}"#),
            None
        );
    }

    #[test]
    fn models_from_openai_and_ollama_shapes() {
        let openai = r#"{"object":"list","data":[{"id":"gpt-a"},{"id":"gpt-b"}]}"#;
        assert_eq!(parse_models_response(openai).unwrap(), vec!["gpt-a", "gpt-b"]);

        let ollama = r#"{"models":[{"name":"qwen3:8b","model":"qwen3:8b"},{"name":"llama3"}]}"#;
        assert_eq!(parse_models_response(ollama).unwrap(), vec!["qwen3:8b", "llama3"]);

        assert!(parse_models_response("\"nope\"").is_err());
    }
}
