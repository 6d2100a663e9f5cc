use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{sort_by_timestamp, MessageStore};
use crate::message::Message;

/// Process-local store, used by tests and one-shot runs.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<Message>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, message_id: &str) -> Option<Message> {
        self.messages
            .read()
            .await
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert_or_replace(&self, message: &Message) -> std::io::Result<()> {
        let mut messages = self.messages.write().await;
        match messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message.clone(),
            None => messages.push(message.clone()),
        }
        Ok(())
    }

    async fn delete(&self, message_id: &str) -> std::io::Result<bool> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|m| m.id != message_id);
        Ok(messages.len() != before)
    }

    async fn get_messages(&self, conversation_id: &str) -> std::io::Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .messages
            .read()
            .await
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        sort_by_timestamp(&mut messages);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn replace_keeps_single_copy() {
        let store = InMemoryMessageStore::new();
        let mut message = Message::assistant("c1", "draft");
        store.insert_or_replace(&message).await.unwrap();

        message.content = "final".to_string();
        store.insert_or_replace(&message).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&message.id).await.unwrap().content, "final");
    }

    #[tokio::test]
    async fn messages_are_ordered_by_timestamp_per_conversation() {
        let store = InMemoryMessageStore::new();
        let mut late = Message::user("c1", "late");
        late.timestamp = late.timestamp + Duration::seconds(10);
        let early = Message::user("c1", "early");
        let other = Message::user("c2", "other");

        for message in [&late, &early, &other] {
            store.insert_or_replace(message).await.unwrap();
        }

        let messages = store.get_messages("c1").await.unwrap();
        let contents: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["early", "late"]);
    }

    #[test]
    fn delete_reports_existence() {
        tokio_test::block_on(async {
            let store = InMemoryMessageStore::new();
            let message = Message::user("c1", "hi");
            store.insert_or_replace(&message).await.unwrap();

            assert!(store.delete(&message.id).await.unwrap());
            assert!(!store.delete(&message.id).await.unwrap());
            assert!(store.is_empty().await);
        });
    }
}
