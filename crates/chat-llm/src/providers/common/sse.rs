//! `text/event-stream` response -> [`LLMStream`] adapter.

use eventsource_stream::Eventsource;
use futures_util::{future, StreamExt};
use reqwest::Response;

use crate::provider::{LLMError, LLMStream, Result};
use crate::types::LLMChunk;

/// Convert an SSE HTTP [`Response`] into an [`LLMStream`].
///
/// `handler` gets each event's `data` payload and returns `Ok(Some(chunk))` to
/// emit, `Ok(None)` to skip, or an error that is surfaced as
/// [`LLMError::Stream`]. Blank payloads never reach the handler. The stream
/// ends right after the first [`LLMChunk::Done`], even if the server keeps the
/// connection open.
pub fn llm_stream_from_sse<H>(response: Response, mut handler: H) -> LLMStream
where
    H: FnMut(&str) -> Result<Option<LLMChunk>> + Send + 'static,
{
    let mut done = false;
    let stream = response
        .bytes_stream()
        .eventsource()
        .filter_map(move |event| {
            let item = match event {
                Err(e) => Some(Err(LLMError::Stream(e.to_string()))),
                Ok(event) if event.data.trim().is_empty() => None,
                Ok(event) => match handler(&event.data) {
                    Ok(chunk) => chunk.map(Ok),
                    Err(LLMError::Stream(msg)) => Some(Err(LLMError::Stream(msg))),
                    Err(other) => Some(Err(LLMError::Stream(other.to_string()))),
                },
            };
            future::ready(item)
        })
        .take_while(move |item| {
            let keep = !done;
            if matches!(item, Ok(LLMChunk::Done)) {
                done = true;
            }
            future::ready(keep)
        });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn network_tests_disabled() -> bool {
        std::env::var_os("CODEX_SANDBOX_NETWORK_DISABLED").is_some()
    }

    async fn serve(body: &'static str) -> (MockServer, Response) {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sse"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&mock_server)
            .await;

        let response = reqwest::Client::new()
            .get(format!("{}/sse", mock_server.uri()))
            .send()
            .await
            .expect("response");
        (mock_server, response)
    }

    #[tokio::test]
    async fn skips_blank_and_filtered_events() {
        if network_tests_disabled() {
            return;
        }

        let (_server, response) = serve(concat!(
            "data: hello\n\n",
            "data: \n\n",
            "data: skip\n\n",
            "data: world\n\n",
        ))
        .await;

        let stream = llm_stream_from_sse(response, |data| {
            if data == "skip" {
                return Ok(None);
            }
            Ok(Some(LLMChunk::Token(data.to_string())))
        });
        let out: Vec<LLMChunk> = stream.map(|item| item.expect("chunk")).collect().await;

        assert_eq!(
            out,
            vec![
                LLMChunk::Token("hello".to_string()),
                LLMChunk::Token("world".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn ends_after_done() {
        if network_tests_disabled() {
            return;
        }

        let (_server, response) = serve(concat!("data: a\n\n", "data: [DONE]\n\n", "data: late\n\n")).await;

        let stream = llm_stream_from_sse(response, |data| {
            if data == "[DONE]" {
                return Ok(Some(LLMChunk::Done));
            }
            Ok(Some(LLMChunk::Token(data.to_string())))
        });
        let out: Vec<LLMChunk> = stream.map(|item| item.expect("chunk")).collect().await;

        assert_eq!(out, vec![LLMChunk::Token("a".to_string()), LLMChunk::Done]);
    }

    #[tokio::test]
    async fn handler_errors_become_stream_errors() {
        if network_tests_disabled() {
            return;
        }

        let (_server, response) = serve("data: boom\n\n").await;
        let mut stream =
            llm_stream_from_sse(response, |_data| Err(LLMError::Api("boom".to_string())));

        match stream.next().await {
            Some(Err(LLMError::Stream(msg))) => assert!(msg.contains("API error")),
            other => panic!("expected LLMError::Stream, got: {other:?}"),
        }
    }
}
