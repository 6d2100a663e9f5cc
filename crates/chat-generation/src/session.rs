//! Per-generation bookkeeping.
//!
//! A [`GenerationSession`] owns the in-flight placeholder and the raw buffer
//! for exactly one streamed answer. Nothing else mutates the placeholder
//! until the session is finalized.

use chat_core::{Message, MessageAlternative, StreamDecoder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationKind {
    /// A brand new assistant reply.
    Fresh,
    /// Another answer for an existing assistant message.
    Regenerate {
        /// The answer at index 0 before this session started.
        original: MessageAlternative,
        previous_alternatives: Vec<MessageAlternative>,
    },
}

#[derive(Debug)]
pub struct GenerationSession {
    placeholder: Message,
    /// Message as stored before a regeneration; equals the placeholder's
    /// identity for fresh sessions.
    base: Message,
    decoder: StreamDecoder,
    kind: GenerationKind,
}

impl GenerationSession {
    /// Start a new assistant reply in `conversation_id`.
    pub fn fresh(conversation_id: &str, implicit_thinking: bool) -> Self {
        let mut placeholder = Message::assistant(conversation_id, "");
        placeholder.is_streaming = true;
        placeholder.is_thinking = implicit_thinking;

        Self {
            base: placeholder.clone(),
            placeholder,
            decoder: StreamDecoder::new(implicit_thinking),
            kind: GenerationKind::Fresh,
        }
    }

    /// Start another answer for `target`, keeping its id and position.
    pub fn regenerate(target: &Message, implicit_thinking: bool) -> Self {
        let mut placeholder = target.clone();
        placeholder.content = String::new();
        placeholder.thinking_content = None;
        placeholder.is_streaming = true;
        placeholder.is_thinking = implicit_thinking;

        Self {
            placeholder,
            base: target.clone(),
            decoder: StreamDecoder::new(implicit_thinking),
            kind: GenerationKind::Regenerate {
                original: MessageAlternative::new(
                    target.content.clone(),
                    target.thinking_content.clone(),
                ),
                previous_alternatives: target.alternatives.clone(),
            },
        }
    }

    pub fn message_id(&self) -> &str {
        &self.placeholder.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.placeholder.conversation_id
    }

    pub fn kind(&self) -> &GenerationKind {
        &self.kind
    }

    pub fn is_regeneration(&self) -> bool {
        matches!(self.kind, GenerationKind::Regenerate { .. })
    }

    pub fn placeholder(&self) -> &Message {
        &self.placeholder
    }

    /// Whether any raw text arrived, tags included.
    pub fn has_output(&self) -> bool {
        !self.decoder.is_empty()
    }

    pub fn raw(&self) -> &str {
        self.decoder.raw()
    }

    /// Feed one fragment and refresh the placeholder's live fields.
    pub fn push(&mut self, fragment: &str) -> &Message {
        let decoded = self.decoder.push(fragment);
        self.placeholder.thinking_content = decoded.thinking_content();
        self.placeholder.content = decoded.content;
        self.placeholder.is_thinking = decoded.still_thinking;
        &self.placeholder
    }

    /// Terminal form of the message, or `None` when nothing was generated.
    ///
    /// The final buffer is decoded once more with the same rule used while
    /// streaming. A regeneration keeps the original at index 0, appends the
    /// new answer to the previous alternatives and selects it.
    pub fn finalize(self) -> Option<Message> {
        if self.decoder.is_empty() {
            return None;
        }

        let decoded = self.decoder.finish();
        let answer = MessageAlternative::new(decoded.content.clone(), decoded.thinking_content());

        let mut message = match self.kind {
            GenerationKind::Fresh => {
                let mut message = self.placeholder;
                message.content = answer.content;
                message.thinking_content = answer.thinking_content;
                message
            }
            GenerationKind::Regenerate {
                original,
                mut previous_alternatives,
            } => {
                let mut message = self.base;
                message.content = original.content;
                message.thinking_content = original.thinking_content;
                previous_alternatives.push(answer);
                message.current_alternative_index = previous_alternatives.len();
                message.alternatives = previous_alternatives;
                message
            }
        };

        message.is_streaming = false;
        message.is_thinking = false;
        Some(message)
    }

    /// The stored message to fall back to when a session produced nothing.
    ///
    /// `None` for fresh sessions: their placeholder is simply dropped.
    pub fn original(&self) -> Option<&Message> {
        if self.is_regeneration() {
            Some(&self.base)
        } else {
            None
        }
    }
}
