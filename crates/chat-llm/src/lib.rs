pub mod provider;
pub mod providers;
pub mod types;

pub use provider::{LLMError, LLMProvider, LLMStream, Result};
pub use providers::OpenAICompatProvider;
pub use types::LLMChunk;
