//! chat-core - Context engine building blocks for OpenAI-compatible chat clients
//!
//! - `message` - Message, Role, alternatives and history helpers
//! - `conversation` - Conversation metadata and title derivation
//! - `config` - ModelConfig, GenerationSettings and on-disk AppConfig
//! - `budget` - Token counting and context trimming
//! - `thinking` - Incremental `<think>` stream decoding
//! - `events` - Generation events observed by UI layers
//! - `storage` - Message store contract and implementations

pub mod budget;
pub mod config;
pub mod conversation;
pub mod events;
pub mod message;
pub mod storage;
pub mod thinking;

pub use budget::{
    BpeTokenCounter, ContextTrimmer, HeuristicTokenCounter, SharedTokenCounter, TokenCounter,
    TokenInfo, TokenizerError, TrimOutcome, TrimmedContext, DEFAULT_RESPONSE_RESERVE,
};
pub use config::{AppConfig, ConfigError, GenerationSettings, ModelConfig, SamplingParams};
pub use conversation::Conversation;
pub use events::{GenerationEvent, TokenBudgetUsage};
pub use message::{Message, MessageAlternative, Role};
pub use storage::{InMemoryMessageStore, JsonlMessageStore, MessageStore};
pub use thinking::{decode_thinking, DecodeState, DecodedStream, StreamDecoder};
