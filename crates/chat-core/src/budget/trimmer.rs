//! Context trimming against a model's token budget.
//!
//! Selection keeps the first user exchange (task framing) and the most recent
//! tail, dropping history from the middle. The full history is never mutated;
//! callers get a [`TrimmedContext`] to send instead.

use serde::{Deserialize, Serialize};

use crate::budget::counter::TokenCounter;
use crate::message::{Message, Role};

/// Tokens held back for the model's answer unless settings say otherwise.
pub const DEFAULT_RESPONSE_RESERVE: u32 = 1024;

/// How a trim ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrimOutcome {
    /// History already fit; returned as is.
    Untouched,
    /// Anchor pair plus the newest messages that fit.
    Trimmed,
    /// The anchor pair alone used up the budget.
    AnchorsOnly,
    /// No user message; kept a prefix of the history.
    NoUserAnchor,
    /// Reserve or system prompt left no room at all.
    Exhausted,
}

/// Token accounting for a trimmed request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsageBreakdown {
    pub system_tokens: u32,
    pub protected_tokens: u32,
    pub window_tokens: u32,
    pub total_tokens: u32,
    /// Budget left for history after reserve and system prompt.
    pub budget_limit: u32,
}

#[derive(Debug, Clone)]
pub struct TrimmedContext {
    pub messages: Vec<Message>,
    pub token_usage: TokenUsageBreakdown,
    pub truncation_occurred: bool,
    pub messages_removed: usize,
    pub outcome: TrimOutcome,
}

/// Summary shown by token inspectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub system_prompt_tokens: u32,
    pub message_tokens: u32,
    pub total_tokens: u32,
    pub message_count: usize,
    pub tokenizer_loaded: bool,
}

/// Selects which messages fit a model's context window.
pub struct ContextTrimmer<'a> {
    counter: &'a dyn TokenCounter,
    reserve: u32,
}

impl<'a> ContextTrimmer<'a> {
    pub fn new(counter: &'a dyn TokenCounter) -> Self {
        Self {
            counter,
            reserve: DEFAULT_RESPONSE_RESERVE,
        }
    }

    pub fn with_reserve(mut self, reserve: u32) -> Self {
        self.reserve = reserve;
        self
    }

    /// Pick the ordered subset of `history` to send.
    ///
    /// The result stays within `context_length - reserve - system prompt`
    /// except when the anchor pair alone is larger; that pair is still
    /// returned whole.
    pub fn trim(&self, history: &[Message], system_prompt: &str, context_length: u32) -> TrimmedContext {
        let system_tokens = self.counter.count_system_prompt_tokens(system_prompt);

        let mut budget = i64::from(context_length) - i64::from(self.reserve);
        if budget <= 0 {
            tracing::warn!(
                "Response reserve ({reserve}) leaves no room in a {context_length}-token context",
                reserve = self.reserve,
                context_length = context_length
            );
            return exhausted(history.len(), system_tokens);
        }

        budget -= i64::from(system_tokens);
        if budget <= 0 {
            tracing::warn!(
                "System prompt ({system_tokens} tokens) exhausts the history budget",
                system_tokens = system_tokens
            );
            return exhausted(history.len(), system_tokens);
        }
        let budget_limit = clamp_u32(budget);

        let costs: Vec<i64> = history
            .iter()
            .map(|m| i64::from(self.counter.count_message_tokens(m)))
            .collect();
        let history_tokens: i64 = costs.iter().sum();

        if history_tokens <= budget {
            return TrimmedContext {
                messages: history.to_vec(),
                token_usage: usage(system_tokens, 0, clamp_u32(history_tokens), budget_limit),
                truncation_occurred: false,
                messages_removed: 0,
                outcome: TrimOutcome::Untouched,
            };
        }

        let Some(anchor) = history.iter().position(|m| m.role == Role::User) else {
            return keep_prefix(history, &costs, budget, system_tokens, budget_limit);
        };

        let mut protected = vec![anchor];
        if history
            .get(anchor + 1)
            .is_some_and(|next| next.role == Role::Assistant)
        {
            protected.push(anchor + 1);
        }
        let protected_tokens: i64 = protected.iter().map(|&i| costs[i]).sum();
        budget -= protected_tokens;

        if budget <= 0 {
            tracing::warn!(
                "Anchor messages ({protected_tokens} tokens) exceed the remaining budget ({budget_limit} tokens)",
                protected_tokens = protected_tokens,
                budget_limit = budget_limit
            );
            let messages: Vec<Message> = protected.iter().map(|&i| history[i].clone()).collect();
            return TrimmedContext {
                messages_removed: history.len() - messages.len(),
                messages,
                token_usage: usage(system_tokens, clamp_u32(protected_tokens), 0, budget_limit),
                truncation_occurred: true,
                outcome: TrimOutcome::AnchorsOnly,
            };
        }

        // Newest first, stopping at the first message that does not fit.
        let mut window: Vec<usize> = Vec::new();
        let mut window_tokens: i64 = 0;
        for index in (0..history.len()).rev() {
            if protected.contains(&index) {
                continue;
            }
            if window_tokens + costs[index] > budget {
                break;
            }
            window_tokens += costs[index];
            window.push(index);
        }
        window.reverse();

        let messages: Vec<Message> = protected
            .iter()
            .chain(window.iter())
            .map(|&i| history[i].clone())
            .collect();

        TrimmedContext {
            messages_removed: history.len() - messages.len(),
            messages,
            token_usage: usage(
                system_tokens,
                clamp_u32(protected_tokens),
                clamp_u32(window_tokens),
                budget_limit,
            ),
            truncation_occurred: true,
            outcome: TrimOutcome::Trimmed,
        }
    }

    /// Token totals for a conversation as it would be sent untrimmed.
    pub fn token_info(&self, messages: &[Message], system_prompt: &str) -> TokenInfo {
        let system_prompt_tokens = self.counter.count_system_prompt_tokens(system_prompt);
        let message_tokens = self.counter.count_messages(messages);
        TokenInfo {
            system_prompt_tokens,
            message_tokens,
            total_tokens: system_prompt_tokens.saturating_add(message_tokens),
            message_count: messages.len(),
            tokenizer_loaded: self.counter.is_tokenizer_loaded(),
        }
    }
}

/// Greedy prefix for histories without any user message.
fn keep_prefix(
    history: &[Message],
    costs: &[i64],
    budget: i64,
    system_tokens: u32,
    budget_limit: u32,
) -> TrimmedContext {
    let mut used: i64 = 0;
    let mut kept = 0;
    for cost in costs {
        if used + cost > budget {
            break;
        }
        used += cost;
        kept += 1;
    }

    TrimmedContext {
        messages: history[..kept].to_vec(),
        token_usage: usage(system_tokens, 0, clamp_u32(used), budget_limit),
        truncation_occurred: true,
        messages_removed: history.len() - kept,
        outcome: TrimOutcome::NoUserAnchor,
    }
}

fn exhausted(history_len: usize, system_tokens: u32) -> TrimmedContext {
    TrimmedContext {
        messages: Vec::new(),
        token_usage: usage(system_tokens, 0, 0, 0),
        truncation_occurred: history_len > 0,
        messages_removed: history_len,
        outcome: TrimOutcome::Exhausted,
    }
}

fn usage(system_tokens: u32, protected_tokens: u32, window_tokens: u32, budget_limit: u32) -> TokenUsageBreakdown {
    TokenUsageBreakdown {
        system_tokens,
        protected_tokens,
        window_tokens,
        total_tokens: system_tokens
            .saturating_add(protected_tokens)
            .saturating_add(window_tokens),
        budget_limit,
    }
}

fn clamp_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::counter::HeuristicTokenCounter;

    // Heuristic cost of a message with `4 * n` chars is 4 + n.
    fn user(chars: usize) -> Message {
        Message::user("c1", "u".repeat(chars))
    }

    fn assistant(chars: usize) -> Message {
        Message::assistant("c1", "a".repeat(chars))
    }

    fn ids(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.id.clone()).collect()
    }

    #[test]
    fn returns_history_unchanged_when_it_fits() {
        let counter = HeuristicTokenCounter;
        let history = vec![user(40), assistant(40), user(40)];

        let trimmed = ContextTrimmer::new(&counter).trim(&history, "Be brief.", 4096 + 1024);

        assert_eq!(trimmed.outcome, TrimOutcome::Untouched);
        assert!(!trimmed.truncation_occurred);
        assert_eq!(trimmed.messages, history);
        assert_eq!(trimmed.token_usage.window_tokens, 42);
    }

    #[test]
    fn reserve_larger_than_context_returns_nothing() {
        let counter = HeuristicTokenCounter;
        let history = vec![user(4)];
        let trimmed = ContextTrimmer::new(&counter).trim(&history, "", 1024);
        assert_eq!(trimmed.outcome, TrimOutcome::Exhausted);
        assert!(trimmed.messages.is_empty());
        assert_eq!(trimmed.messages_removed, 1);
    }

    #[test]
    fn system_prompt_can_exhaust_budget() {
        let counter = HeuristicTokenCounter;
        let history = vec![user(4)];
        // prompt costs 4 + 25 = 29 > 20
        let trimmed = ContextTrimmer::new(&counter)
            .with_reserve(0)
            .trim(&history, &"p".repeat(100), 20);
        assert_eq!(trimmed.outcome, TrimOutcome::Exhausted);
        assert!(trimmed.messages.is_empty());
    }

    #[test]
    fn keeps_anchor_pair_and_newest_tail() {
        let counter = HeuristicTokenCounter;
        // each message costs 14
        let history = vec![user(40), assistant(40), user(40), assistant(40), user(40), assistant(40)];

        // 28 for the anchors, room for two more
        let trimmed = ContextTrimmer::new(&counter).with_reserve(0).trim(&history, "", 56);

        assert_eq!(trimmed.outcome, TrimOutcome::Trimmed);
        assert_eq!(
            ids(&trimmed.messages),
            vec![
                history[0].id.clone(),
                history[1].id.clone(),
                history[4].id.clone(),
                history[5].id.clone()
            ]
        );
        assert_eq!(trimmed.messages_removed, 2);
        assert_eq!(trimmed.token_usage.protected_tokens, 28);
        assert_eq!(trimmed.token_usage.window_tokens, 28);
    }

    #[test]
    fn anchor_without_assistant_reply_is_protected_alone() {
        let counter = HeuristicTokenCounter;
        let history = vec![user(40), user(40), user(40), user(40)];
        let trimmed = ContextTrimmer::new(&counter).with_reserve(0).trim(&history, "", 30);
        assert_eq!(
            ids(&trimmed.messages),
            vec![history[0].id.clone(), history[3].id.clone()]
        );
    }

    #[test]
    fn tail_stops_at_first_overflow() {
        let counter = HeuristicTokenCounter;
        // newest is small, second newest large, third newest small again
        let history = vec![user(40), assistant(40), user(4), user(400), user(4)];
        let trimmed = ContextTrimmer::new(&counter).with_reserve(0).trim(&history, "", 40);

        assert_eq!(
            ids(&trimmed.messages),
            vec![history[0].id.clone(), history[1].id.clone(), history[4].id.clone()]
        );
    }

    #[test]
    fn oversized_anchors_are_returned_alone() {
        let counter = HeuristicTokenCounter;
        let history = vec![user(400), assistant(400), user(4)];
        let trimmed = ContextTrimmer::new(&counter).with_reserve(0).trim(&history, "", 100);

        assert_eq!(trimmed.outcome, TrimOutcome::AnchorsOnly);
        assert_eq!(
            ids(&trimmed.messages),
            vec![history[0].id.clone(), history[1].id.clone()]
        );
        assert!(trimmed.token_usage.total_tokens > trimmed.token_usage.budget_limit);
    }

    #[test]
    fn history_without_user_keeps_prefix_until_overflow() {
        let counter = HeuristicTokenCounter;
        let history = vec![assistant(40), assistant(400), assistant(4)];
        let trimmed = ContextTrimmer::new(&counter).with_reserve(0).trim(&history, "", 30);

        assert_eq!(trimmed.outcome, TrimOutcome::NoUserAnchor);
        assert_eq!(ids(&trimmed.messages), vec![history[0].id.clone()]);
        assert_eq!(trimmed.messages_removed, 2);
    }

    #[test]
    fn token_info_sums_prompt_and_messages() {
        let counter = HeuristicTokenCounter;
        let history = vec![user(40), assistant(40)];
        let info = ContextTrimmer::new(&counter).token_info(&history, "abcdefgh");
        assert_eq!(
            info,
            TokenInfo {
                system_prompt_tokens: 6,
                message_tokens: 28,
                total_tokens: 34,
                message_count: 2,
                tokenizer_loaded: false,
            }
        );
    }
}
