use serde::{Deserialize, Serialize};

use crate::budget::{TrimOutcome, TrimmedContext};
use crate::message::Message;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GenerationEvent {
    /// Emitted once the history has been trimmed for the request
    ContextPrepared {
        usage: TokenBudgetUsage,
    },

    /// Placeholder created; streaming is about to start
    Started {
        message: Message,
    },

    Updated {
        message_id: String,
        content: String,
        thinking_content: Option<String>,
        is_thinking: bool,
    },

    /// `None` when the model produced nothing and the placeholder was discarded
    Completed {
        message: Option<Message>,
    },

    Cancelled {
        message: Option<Message>,
    },

    Error {
        message: String,
        persisted: Option<Message>,
    },
}

impl GenerationEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GenerationEvent::Completed { .. }
                | GenerationEvent::Cancelled { .. }
                | GenerationEvent::Error { .. }
        )
    }
}

/// Token budget usage sent to observers after trimming
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenBudgetUsage {
    pub system_tokens: u32,
    /// Tokens used by the first user exchange
    pub protected_tokens: u32,
    /// Tokens used by the recent message window
    pub window_tokens: u32,
    pub total_tokens: u32,
    pub budget_limit: u32,
    pub truncation_occurred: bool,
    pub messages_removed: usize,
    pub outcome: TrimOutcome,
}

impl From<&TrimmedContext> for TokenBudgetUsage {
    fn from(trimmed: &TrimmedContext) -> Self {
        Self {
            system_tokens: trimmed.token_usage.system_tokens,
            protected_tokens: trimmed.token_usage.protected_tokens,
            window_tokens: trimmed.token_usage.window_tokens,
            total_tokens: trimmed.token_usage.total_tokens,
            budget_limit: trimmed.token_usage.budget_limit,
            truncation_occurred: trimmed.truncation_occurred,
            messages_removed: trimmed.messages_removed,
            outcome: trimmed.outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_tagged_in_snake_case() {
        let event = GenerationEvent::Updated {
            message_id: "m1".to_string(),
            content: "hi".to_string(),
            thinking_content: None,
            is_thinking: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "updated");
        assert!(!event.is_terminal());

        let done = GenerationEvent::Completed { message: None };
        assert_eq!(serde_json::to_value(&done).unwrap()["type"], "completed");
        assert!(done.is_terminal());
    }
}
