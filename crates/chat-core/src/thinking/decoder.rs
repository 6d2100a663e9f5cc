//! Splits a raw completion into reasoning and answer.
//!
//! Models wrap reasoning in `<think>` ... `</think>`. Models flagged as
//! implicit thinkers may omit the opening tag, in which case everything up to
//! the first closing tag is reasoning. The split is a pure function of the
//! accumulated text and the mode flag: [`StreamDecoder`] fed any sequence of
//! fragments ends in the same state as [`decode_thinking`] on their
//! concatenation.

use serde::{Deserialize, Serialize};

pub const OPEN_TAG: &str = "<think>";
pub const CLOSE_TAG: &str = "</think>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeState {
    /// No reasoning seen; text is answer content.
    Idle,
    /// Reasoning is open and still streaming.
    InThinking,
    /// Reasoning closed; further text is answer content.
    ThinkingClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedStream {
    pub thinking: String,
    pub content: String,
    pub still_thinking: bool,
}

impl DecodedStream {
    /// Reasoning as stored on a message: `None` when empty.
    pub fn thinking_content(&self) -> Option<String> {
        if self.thinking.is_empty() {
            None
        } else {
            Some(self.thinking.clone())
        }
    }
}

/// Decode a complete buffer in one call.
pub fn decode_thinking(raw: &str, implicit: bool) -> DecodedStream {
    classify(raw, raw.find(OPEN_TAG), raw.find(CLOSE_TAG), implicit).0
}

fn classify(
    raw: &str,
    open_at: Option<usize>,
    close_at: Option<usize>,
    implicit: bool,
) -> (DecodedStream, DecodeState) {
    match (open_at, close_at) {
        (Some(open), Some(close)) if close > open => (
            DecodedStream {
                thinking: raw[open + OPEN_TAG.len()..close].trim().to_string(),
                content: raw[close + CLOSE_TAG.len()..].trim().to_string(),
                still_thinking: false,
            },
            DecodeState::ThinkingClosed,
        ),
        (Some(open), None) => (
            DecodedStream {
                thinking: raw[open + OPEN_TAG.len()..].trim().to_string(),
                content: String::new(),
                still_thinking: true,
            },
            DecodeState::InThinking,
        ),
        (_, Some(close)) if implicit => (
            DecodedStream {
                thinking: strip_open_prefix(&raw[..close]).trim().to_string(),
                content: raw[close + CLOSE_TAG.len()..].trim().to_string(),
                still_thinking: false,
            },
            DecodeState::ThinkingClosed,
        ),
        (_, None) if implicit => (
            DecodedStream {
                thinking: strip_open_prefix(raw).trim().to_string(),
                content: String::new(),
                still_thinking: true,
            },
            DecodeState::InThinking,
        ),
        _ => (
            DecodedStream {
                thinking: String::new(),
                content: raw.to_string(),
                still_thinking: false,
            },
            DecodeState::Idle,
        ),
    }
}

fn strip_open_prefix(text: &str) -> &str {
    text.strip_prefix(OPEN_TAG).unwrap_or(text)
}

/// First occurrence of `tag` in `haystack` at or after byte `from`.
///
/// Tags are ASCII, so a byte match always lands on a char boundary.
fn find_from(haystack: &str, tag: &str, from: usize) -> Option<usize> {
    let bytes = haystack.as_bytes();
    if from >= bytes.len() {
        return None;
    }
    bytes[from..]
        .windows(tag.len())
        .position(|window| window == tag.as_bytes())
        .map(|offset| from + offset)
}

/// Incremental decoder over an owned, growing buffer.
///
/// Tag positions are the first occurrences in the buffer and never move once
/// found, so each push only scans the new bytes plus a tag-length overlap.
#[derive(Debug, Clone)]
pub struct StreamDecoder {
    buffer: String,
    implicit: bool,
    open_at: Option<usize>,
    close_at: Option<usize>,
    /// Buffer length at the previous scan.
    scanned: usize,
    state: DecodeState,
}

impl StreamDecoder {
    pub fn new(implicit: bool) -> Self {
        Self {
            buffer: String::new(),
            implicit,
            open_at: None,
            close_at: None,
            scanned: 0,
            state: DecodeState::Idle,
        }
    }

    /// Append a fragment and decode the whole buffer so far.
    pub fn push(&mut self, fragment: &str) -> DecodedStream {
        self.buffer.push_str(fragment);
        self.scan();
        let (decoded, state) = classify(&self.buffer, self.open_at, self.close_at, self.implicit);
        self.state = state;
        decoded
    }

    fn scan(&mut self) {
        if self.open_at.is_none() {
            let from = self.scanned.saturating_sub(OPEN_TAG.len() - 1);
            self.open_at = find_from(&self.buffer, OPEN_TAG, from);
        }
        if self.close_at.is_none() {
            let from = self.scanned.saturating_sub(CLOSE_TAG.len() - 1);
            self.close_at = find_from(&self.buffer, CLOSE_TAG, from);
        }
        self.scanned = self.buffer.len();
    }

    /// Decode the buffer as it stands, without appending.
    pub fn finish(&self) -> DecodedStream {
        classify(&self.buffer, self.open_at, self.close_at, self.implicit).0
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    pub fn raw(&self) -> &str {
        &self.buffer
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_implicit(&self) -> bool {
        self.implicit
    }
}
