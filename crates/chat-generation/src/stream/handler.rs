use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use chat_core::Message;
use chat_llm::{LLMChunk, LLMError, LLMStream};

use crate::session::GenerationSession;

/// Why fragment consumption stopped.
#[derive(Debug)]
pub enum StreamEnd {
    /// `Done` arrived or the server closed the stream.
    Completed,
    Cancelled,
    Failed(LLMError),
}

/// Apply fragments to `session` strictly in arrival order until the stream
/// ends, fails, or `cancel_token` fires.
///
/// `on_update` sees the placeholder after every non-empty fragment. The
/// stream is dropped on return, which aborts the underlying request.
pub async fn consume_fragments<F>(
    mut stream: LLMStream,
    session: &mut GenerationSession,
    cancel_token: &CancellationToken,
    mut on_update: F,
) -> StreamEnd
where
    F: FnMut(&Message),
{
    let session_id = session.message_id().to_string();
    let mut fragments = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log::debug!("[{}] Stream cancelled after {} fragments", session_id, fragments);
                return StreamEnd::Cancelled;
            }
            next = stream.next() => next,
        };

        match next {
            Some(Ok(LLMChunk::Token(fragment))) => {
                if fragment.is_empty() {
                    continue;
                }
                fragments += 1;
                on_update(session.push(&fragment));
            }
            Some(Ok(LLMChunk::Done)) => {
                log::debug!("[{}] Stream completed after {} fragments", session_id, fragments);
                return StreamEnd::Completed;
            }
            Some(Err(error)) => {
                log::warn!("[{}] Stream failed: {}", session_id, error);
                return StreamEnd::Failed(error);
            }
            None => {
                log::debug!("[{}] Stream closed without [DONE]", session_id);
                return StreamEnd::Completed;
            }
        }
    }
}
