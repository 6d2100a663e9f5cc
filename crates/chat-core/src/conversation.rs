use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MAX_TITLE_CHARS: usize = 50;
const TRUNCATED_TITLE_CHARS: usize = 47;
const DEFAULT_TITLE: &str = "New conversation";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub model_config_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Start a conversation titled after its first message.
    pub fn new(first_message: &str, model_config_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            title: title_from_first_message(first_message),
            model_config_id: model_config_id.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

pub fn title_from_first_message(message: &str) -> String {
    if message.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if message.chars().count() > MAX_TITLE_CHARS {
        let head: String = message.chars().take(TRUNCATED_TITLE_CHARS).collect();
        return format!("{head}...");
    }
    message.to_string()
}
