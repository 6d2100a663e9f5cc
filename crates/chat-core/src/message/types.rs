use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A previously completed answer kept for the same turn.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageAlternative {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_content: Option<String>,
}

impl MessageAlternative {
    pub fn new(content: impl Into<String>, thinking_content: Option<String>) -> Self {
        Self {
            content: content.into(),
            thinking_content,
        }
    }
}

/// A single chat message.
///
/// `current_alternative_index == 0` selects `content`/`thinking_content`;
/// any `i > 0` selects `alternatives[i - 1]`. While `is_streaming` is set the
/// live fields are shown regardless of the index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    #[serde(default = "generate_id")]
    pub id: String,
    pub conversation_id: String,
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking_content: Option<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub is_streaming: bool,
    #[serde(skip)]
    pub is_thinking: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<MessageAlternative>,
    #[serde(default)]
    pub current_alternative_index: usize,
}

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

impl Message {
    pub fn new(conversation_id: impl Into<String>, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            image_data: None,
            thinking_content: None,
            timestamp: Utc::now(),
            is_streaming: false,
            is_thinking: false,
            alternatives: Vec::new(),
            current_alternative_index: 0,
        }
    }

    pub fn user(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::User, content)
    }

    pub fn assistant(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::Assistant, content)
    }

    pub fn system(conversation_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(conversation_id, Role::System, content)
    }

    pub fn with_image(mut self, image_data: impl Into<String>) -> Self {
        self.image_data = Some(image_data.into());
        self
    }

    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking_content = Some(thinking.into());
        self
    }

    pub fn has_image(&self) -> bool {
        self.image_data.is_some()
    }

    /// Number of selectable answers, the original included.
    pub fn total_alternatives(&self) -> usize {
        self.alternatives.len() + 1
    }

    pub fn display_content(&self) -> &str {
        if self.is_streaming || self.current_alternative_index == 0 {
            return &self.content;
        }
        self.alternatives
            .get(self.current_alternative_index - 1)
            .map(|alt| alt.content.as_str())
            .unwrap_or(&self.content)
    }

    pub fn display_thinking_content(&self) -> Option<&str> {
        if self.is_streaming || self.current_alternative_index == 0 {
            return self.thinking_content.as_deref();
        }
        self.alternatives
            .get(self.current_alternative_index - 1)
            .and_then(|alt| alt.thinking_content.as_deref())
    }

    /// The answer shown at `index`, where 0 is the original.
    pub fn answer_at(&self, index: usize) -> Option<MessageAlternative> {
        if index == 0 {
            return Some(MessageAlternative::new(
                self.content.clone(),
                self.thinking_content.clone(),
            ));
        }
        self.alternatives.get(index - 1).cloned()
    }

    /// Clamp-select an alternative. Returns the index actually selected.
    pub fn select_alternative(&mut self, index: usize) -> usize {
        self.current_alternative_index = index.min(self.total_alternatives() - 1);
        self.current_alternative_index
    }

    /// Step to the previous answer. Returns false when already at the first.
    pub fn previous_alternative(&mut self) -> bool {
        if self.current_alternative_index == 0 {
            return false;
        }
        self.select_alternative(self.current_alternative_index - 1);
        true
    }

    /// Step to the next answer. Returns false when already at the last.
    pub fn next_alternative(&mut self) -> bool {
        if self.current_alternative_index + 1 >= self.total_alternatives() {
            return false;
        }
        self.select_alternative(self.current_alternative_index + 1);
        true
    }

    /// Copy with replaced content, keeping identity and position.
    pub fn edited(&self, content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn regenerated(original: &str, answers: &[&str]) -> Message {
        let mut message = Message::assistant("c1", original);
        message.alternatives = answers
            .iter()
            .map(|answer| MessageAlternative::new(*answer, None))
            .collect();
        message.current_alternative_index = answers.len();
        message
    }

    #[test]
    fn display_uses_content_at_index_zero() {
        let message = Message::assistant("c1", "hello").with_thinking("plan");
        assert_eq!(message.display_content(), "hello");
        assert_eq!(message.display_thinking_content(), Some("plan"));
        assert_eq!(message.total_alternatives(), 1);
    }

    #[test]
    fn display_follows_selected_alternative() {
        let mut message = regenerated("A", &["B", "C"]);
        assert_eq!(message.display_content(), "C");

        message.select_alternative(1);
        assert_eq!(message.display_content(), "B");

        message.select_alternative(0);
        assert_eq!(message.display_content(), "A");
    }

    #[test]
    fn streaming_always_shows_live_buffer() {
        let mut message = regenerated("A", &["B"]);
        message.is_streaming = true;
        message.content = "live".to_string();
        assert_eq!(message.display_content(), "live");
    }

    #[test]
    fn alternative_thinking_does_not_fall_back_to_original() {
        let mut message = regenerated("A", &["B"]).with_thinking("original plan");
        message.current_alternative_index = 1;
        assert_eq!(message.display_thinking_content(), None);
    }

    #[test]
    fn navigation_clamps_to_bounds() {
        let mut message = regenerated("A", &["B", "C"]);
        assert!(!message.next_alternative());
        assert_eq!(message.current_alternative_index, 2);

        assert!(message.previous_alternative());
        assert!(message.previous_alternative());
        assert!(!message.previous_alternative());
        assert_eq!(message.current_alternative_index, 0);

        assert_eq!(message.select_alternative(99), 2);
    }

    #[test]
    fn navigation_never_touches_stored_answers() {
        let mut message = regenerated("A", &["B"]);
        let before = (message.content.clone(), message.alternatives.clone());
        message.previous_alternative();
        message.next_alternative();
        assert_eq!((message.content.clone(), message.alternatives.clone()), before);
    }

    #[test]
    fn answer_at_zero_is_original() {
        let message = regenerated("A", &["B"]);
        assert_eq!(message.answer_at(0).map(|a| a.content), Some("A".to_string()));
        assert_eq!(message.answer_at(1).map(|a| a.content), Some("B".to_string()));
        assert!(message.answer_at(2).is_none());
    }

    #[test]
    fn transient_flags_are_not_serialized() {
        let mut message = Message::assistant("c1", "hi");
        message.is_streaming = true;
        message.is_thinking = true;

        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("is_streaming").is_none());
        assert!(json.get("is_thinking").is_none());

        let restored: Message = serde_json::from_value(json).unwrap();
        assert!(!restored.is_streaming);
        assert!(!restored.is_thinking);
    }
}
