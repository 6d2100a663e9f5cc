//! Token budget management.
//!
//! - [`counter`]: token counting with a BPE tokenizer and a heuristic fallback
//! - [`trimmer`]: selecting the messages that fit a model's context window

pub mod counter;
pub mod trimmer;

pub use counter::{
    BpeTokenCounter, HeuristicTokenCounter, SharedTokenCounter, TokenCounter, TokenizerError,
    IMAGE_TOKENS, MESSAGE_OVERHEAD_TOKENS, THINKING_OVERHEAD_TOKENS,
};
pub use trimmer::{
    ContextTrimmer, TokenInfo, TokenUsageBreakdown, TrimOutcome, TrimmedContext,
    DEFAULT_RESPONSE_RESERVE,
};
