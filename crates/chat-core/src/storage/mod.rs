//! Message persistence.
//!
//! The store is the single source of truth once a generation reaches a
//! terminal state. Writes are whole-message replacements keyed by id.

pub mod jsonl;
pub mod memory;

use async_trait::async_trait;

use crate::message::Message;

pub use jsonl::JsonlMessageStore;
pub use memory::InMemoryMessageStore;

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert `message`, replacing any stored message with the same id.
    async fn insert_or_replace(&self, message: &Message) -> std::io::Result<()>;

    /// Remove a message by id. Returns whether it existed.
    async fn delete(&self, message_id: &str) -> std::io::Result<bool>;

    /// Messages of a conversation ordered by timestamp.
    async fn get_messages(&self, conversation_id: &str) -> std::io::Result<Vec<Message>>;
}

/// Stable sort so messages sharing a timestamp keep insertion order.
pub(crate) fn sort_by_timestamp(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.timestamp);
}
