//! Turns cumulative message snapshots into printable increments.

use chat_core::Message;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct Delta {
    pub thinking: String,
    pub content: String,
    /// First answer text after some reasoning was already shown.
    pub answer_started: bool,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.thinking.is_empty() && self.content.is_empty()
    }
}

/// Remembers what was already printed for the message being streamed.
#[derive(Debug, Default)]
pub struct StreamPrinter {
    message_id: Option<String>,
    thinking: String,
    content: String,
}

impl StreamPrinter {
    pub fn update(&mut self, message_id: &str, thinking: Option<&str>, content: &str) -> Delta {
        if self.message_id.as_deref() != Some(message_id) {
            self.message_id = Some(message_id.to_string());
            self.thinking.clear();
            self.content.clear();
        }

        let had_content = !self.content.is_empty();
        let thinking = advance(&mut self.thinking, thinking.unwrap_or(""));
        let content = advance(&mut self.content, content);
        let answer_started = !had_content && !content.is_empty() && !self.thinking.is_empty();

        Delta {
            thinking,
            content,
            answer_started,
        }
    }

    /// Print whatever the terminal form of `message` adds.
    pub fn finish(&mut self, message: &Message) -> Delta {
        self.update(
            &message.id,
            message.display_thinking_content(),
            message.display_content(),
        )
    }
}

/// New suffix of `current` relative to `printed`.
///
/// Decoded text is trimmed, so a snapshot is not always an extension of the
/// last one. In that case nothing is printed and the snapshot is adopted.
fn advance(printed: &mut String, current: &str) -> String {
    let delta = match current.strip_prefix(printed.as_str()) {
        Some(suffix) => suffix.to_string(),
        None => String::new(),
    };
    printed.clear();
    printed.push_str(current);
    delta
}
