//! Token counting for context budgeting.
//!
//! [`BpeTokenCounter`] wraps a Hugging Face `tokenizer.json` loaded lazily on
//! first use. Whenever no tokenizer is available every count degrades to the
//! chars/4 heuristic of [`HeuristicTokenCounter`]; counting never fails.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tokenizers::Tokenizer;

use crate::message::Message;

/// Per-message overhead for role and delimiters.
pub const MESSAGE_OVERHEAD_TOKENS: u32 = 4;
/// Extra cost of a thinking block on top of its text.
pub const THINKING_OVERHEAD_TOKENS: u32 = 2;
/// Flat cost of one attached image tile.
pub const IMAGE_TOKENS: u32 = 170;

const CHARS_PER_TOKEN: u32 = 4;

#[derive(Debug, Error)]
pub enum TokenizerError {
    #[error("No tokenizer path configured")]
    NotConfigured,

    #[error("Tokenizer failed to load earlier")]
    Unavailable,

    #[error("Failed to load tokenizer from {path}: {message}")]
    Load { path: PathBuf, message: String },

    #[error("Tokenizer loading task failed: {0}")]
    Join(String),
}

/// Converts text and messages to token counts.
///
/// Only [`TokenCounter::count_tokens`] is required; the message-level counts are
/// built from it with fixed overhead constants.
#[async_trait]
pub trait TokenCounter: Send + Sync {
    /// Load whatever backing tokenizer the counter uses. Never fails; a counter
    /// that cannot load keeps answering with the heuristic.
    async fn ensure_initialized(&self) {}

    /// Count tokens in plain text.
    fn count_tokens(&self, text: &str) -> u32;

    /// Whether counts come from a real tokenizer rather than the heuristic.
    fn is_tokenizer_loaded(&self) -> bool {
        false
    }

    /// Cost of a message inside a request: overhead, displayed content,
    /// thinking and image.
    fn count_message_tokens(&self, message: &Message) -> u32 {
        let thinking_tokens = message
            .display_thinking_content()
            .map(|thinking| THINKING_OVERHEAD_TOKENS.saturating_add(self.count_tokens(thinking)))
            .unwrap_or(0);
        let image_tokens = if message.has_image() { IMAGE_TOKENS } else { 0 };

        MESSAGE_OVERHEAD_TOKENS
            .saturating_add(self.count_tokens(message.display_content()))
            .saturating_add(thinking_tokens)
            .saturating_add(image_tokens)
    }

    /// Badge count shown next to a message, without request overhead.
    fn count_display_tokens(&self, message: &Message) -> u32 {
        let mut tokens = self.count_tokens(message.display_content());
        if let Some(thinking) = message.display_thinking_content() {
            tokens = tokens.saturating_add(self.count_tokens(thinking));
        }
        if message.has_image() {
            tokens = tokens.saturating_add(IMAGE_TOKENS);
        }
        tokens
    }

    fn count_system_prompt_tokens(&self, prompt: &str) -> u32 {
        if prompt.trim().is_empty() {
            return 0;
        }
        MESSAGE_OVERHEAD_TOKENS.saturating_add(self.count_tokens(prompt))
    }

    fn count_messages(&self, messages: &[Message]) -> u32 {
        messages
            .iter()
            .fold(0u32, |acc, m| acc.saturating_add(self.count_message_tokens(m)))
    }
}

/// Arc-wrapped token counter shared between the trimmer and the coordinator.
pub type SharedTokenCounter = Arc<dyn TokenCounter>;

/// `max(1, ceil(chars / 4))`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTokenCounter;

impl HeuristicTokenCounter {
    pub fn estimate(text: &str) -> u32 {
        let chars = u32::try_from(text.chars().count()).unwrap_or(u32::MAX);
        chars.div_ceil(CHARS_PER_TOKEN).max(1)
    }
}

impl TokenCounter for HeuristicTokenCounter {
    fn count_tokens(&self, text: &str) -> u32 {
        Self::estimate(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Pending,
    Loaded,
    Failed,
}

/// Byte-pair-encoding counter backed by a `tokenizer.json`.
///
/// Owned explicitly and injected where needed. [`BpeTokenCounter::initialize`]
/// loads the file on a blocking thread; [`BpeTokenCounter::shutdown`] drops it
/// and allows a later re-initialization.
pub struct BpeTokenCounter {
    path: Option<PathBuf>,
    tokenizer: RwLock<Option<Arc<Tokenizer>>>,
    state: tokio::sync::Mutex<LoadState>,
}

impl BpeTokenCounter {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            tokenizer: RwLock::new(None),
            state: tokio::sync::Mutex::new(LoadState::Pending),
        }
    }

    /// Load the tokenizer once. Later calls return immediately, including
    /// after a failed attempt.
    pub async fn initialize(&self) -> Result<(), TokenizerError> {
        self.initialize_with(|path| Tokenizer::from_file(path).map_err(|e| e.to_string()))
            .await
    }

    async fn initialize_with<F>(&self, load: F) -> Result<(), TokenizerError>
    where
        F: FnOnce(&Path) -> Result<Tokenizer, String> + Send + 'static,
    {
        let mut state = self.state.lock().await;
        match *state {
            LoadState::Loaded => return Ok(()),
            LoadState::Failed => return Err(TokenizerError::Unavailable),
            LoadState::Pending => {}
        }

        let Some(path) = self.path.clone() else {
            *state = LoadState::Failed;
            return Err(TokenizerError::NotConfigured);
        };

        let load_path = path.clone();
        let loaded = match tokio::task::spawn_blocking(move || load(&load_path)).await {
            Ok(loaded) => loaded,
            Err(e) => {
                *state = LoadState::Failed;
                return Err(TokenizerError::Join(e.to_string()));
            }
        };

        match loaded {
            Ok(tokenizer) => {
                if let Ok(mut slot) = self.tokenizer.write() {
                    *slot = Some(Arc::new(tokenizer));
                }
                *state = LoadState::Loaded;
                log::info!("Loaded tokenizer from {:?}", path);
                Ok(())
            }
            Err(message) => {
                *state = LoadState::Failed;
                Err(TokenizerError::Load { path, message })
            }
        }
    }

    /// Release the tokenizer. Counting falls back to the heuristic until the
    /// next [`BpeTokenCounter::initialize`].
    pub async fn shutdown(&self) {
        let mut state = self.state.lock().await;
        if let Ok(mut slot) = self.tokenizer.write() {
            *slot = None;
        }
        *state = LoadState::Pending;
    }

    fn loaded(&self) -> Option<Arc<Tokenizer>> {
        self.tokenizer.read().ok().and_then(|slot| slot.clone())
    }

    /// Token strings for `text`, when a tokenizer is loaded.
    pub fn tokenize(&self, text: &str) -> Option<Vec<String>> {
        let tokenizer = self.loaded()?;
        tokenizer
            .encode(text, false)
            .ok()
            .map(|encoding| encoding.get_tokens().to_vec())
    }

    pub fn vocab_size(&self) -> Option<usize> {
        self.loaded().map(|tokenizer| tokenizer.get_vocab_size(true))
    }
}

#[async_trait]
impl TokenCounter for BpeTokenCounter {
    async fn ensure_initialized(&self) {
        if let Err(e) = self.initialize().await {
            if matches!(e, TokenizerError::Load { .. } | TokenizerError::Join(_)) {
                log::warn!("Tokenizer unavailable, using heuristic counts: {}", e);
            }
        }
    }

    fn count_tokens(&self, text: &str) -> u32 {
        let Some(tokenizer) = self.loaded() else {
            return HeuristicTokenCounter::estimate(text);
        };
        match tokenizer.encode(text, false) {
            Ok(encoding) => u32::try_from(encoding.get_ids().len()).unwrap_or(u32::MAX),
            Err(e) => {
                log::debug!("Tokenizer encode failed, using heuristic: {}", e);
                HeuristicTokenCounter::estimate(text)
            }
        }
    }

    fn is_tokenizer_loaded(&self) -> bool {
        self.loaded().is_some()
    }
}
