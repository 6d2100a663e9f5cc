use chat_llm::LLMError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Transport error: {0}")]
    Transport(#[from] LLMError),

    #[error("Store error: {0}")]
    Store(#[from] std::io::Error),

    #[error("Cannot regenerate message {0}")]
    InvalidTarget(String),

    #[error("Generation task failed: {0}")]
    Task(String),
}
