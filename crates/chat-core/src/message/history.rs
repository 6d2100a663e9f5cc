//! Helpers over an ordered conversation history.

use super::types::{Message, Role};

/// Ids to remove when deleting `message_id`.
///
/// Deleting a user message also removes the assistant reply right after it.
pub fn removal_set(messages: &[Message], message_id: &str) -> Vec<String> {
    let Some(index) = messages.iter().position(|m| m.id == message_id) else {
        return Vec::new();
    };

    let mut ids = vec![messages[index].id.clone()];
    if messages[index].role == Role::User {
        if let Some(next) = messages.get(index + 1) {
            if next.role == Role::Assistant {
                ids.push(next.id.clone());
            }
        }
    }
    ids
}

/// Messages strictly before `message_id`, used as context when regenerating it.
pub fn context_before<'a>(messages: &'a [Message], message_id: &str) -> Option<&'a [Message]> {
    messages
        .iter()
        .position(|m| m.id == message_id)
        .map(|index| &messages[..index])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<Message> {
        vec![
            Message::user("c1", "q1"),
            Message::assistant("c1", "a1"),
            Message::user("c1", "q2"),
            Message::user("c1", "q3"),
        ]
    }

    #[test]
    fn deleting_user_message_takes_reply_along() {
        let messages = history();
        let ids = removal_set(&messages, &messages[0].id);
        assert_eq!(ids, vec![messages[0].id.clone(), messages[1].id.clone()]);
    }

    #[test]
    fn deleting_user_message_without_reply_removes_only_itself() {
        let messages = history();
        let ids = removal_set(&messages, &messages[2].id);
        assert_eq!(ids, vec![messages[2].id.clone()]);
    }

    #[test]
    fn deleting_assistant_message_removes_only_itself() {
        let messages = history();
        let ids = removal_set(&messages, &messages[1].id);
        assert_eq!(ids, vec![messages[1].id.clone()]);
    }

    #[test]
    fn unknown_id_removes_nothing() {
        assert!(removal_set(&history(), "missing").is_empty());
    }

    #[test]
    fn context_before_excludes_target() {
        let messages = history();
        let context = context_before(&messages, &messages[1].id).unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].content, "q1");
        assert!(context_before(&messages, "missing").is_none());
    }
}
