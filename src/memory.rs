//! # Chat memory
//!
//! [`ConversationMemory`] is the rolling window of past turns sent with every
//! request. It holds [`Turn`]s oldest-first and a token budget; whenever the
//! window grows past the budget the oldest turns are dropped. The most recent
//! turn always survives, even when it alone exceeds the budget.
//!
//! Token counts use `tiktoken_rs::cl100k_base`. When the encoder cannot be
//! loaded the count falls back to a four-characters-per-token estimate.
//!
//! ```rust
//! use parley::memory::{ConversationMemory, Role, Turn};
//!
//! let mut memory = ConversationMemory::new(256);
//! memory.push(Turn::new(Role::User, "Hello!".into()));
//! memory.push(Turn::new(Role::Assistant, "Hi there".into()));
//! assert_eq!(memory.len(), 2);
//! ```

use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use tiktoken_rs::{CoreBPE, cl100k_base};

static BPE: Lazy<Option<CoreBPE>> = Lazy::new(|| match cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(err) => {
        tracing::warn!("cl100k_base unavailable, estimating tokens: {err}");
        None
    }
});

/// Number of tokens in `text`.
pub fn count_tokens(text: &str) -> usize {
    match BPE.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => text.chars().count().div_ceil(4),
    }
}

/// Who said something.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Parse the lowercase wire name (`"user"`, `"assistant"`, `"system"`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "system" => Some(Role::System),
            "user" | "you" | "human" => Some(Role::User),
            "assistant" | "ai" | "bot" => Some(Role::Assistant),
            _ => None,
        }
    }

    /// Label used in plain-text transcripts.
    pub fn label(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "You",
            Role::Assistant => "Assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        })
    }
}

/// One role/text pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: String) -> Self {
        Self { role, content }
    }

    pub fn token_count(&self) -> usize {
        count_tokens(&self.content)
    }

    /// Convert to the request type of the chat-completion API.
    #[allow(deprecated)]
    pub fn to_request_message(&self) -> ChatCompletionRequestMessage {
        match self.role {
            Role::System => ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(self.content.clone()),
                name: None,
            }),
            Role::User => ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(self.content.clone()),
                name: None,
            }),
            Role::Assistant => {
                ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
                    content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                        self.content.clone(),
                    )),
                    name: None,
                    refusal: None,
                    audio: None,
                    tool_calls: None,
                    function_call: None,
                })
            }
        }
    }
}

/// Token-bounded window of recent turns.
#[derive(Debug, Clone)]
pub struct ConversationMemory {
    turns: VecDeque<Turn>,
    max_tokens: usize,
}

impl ConversationMemory {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            turns: VecDeque::new(),
            max_tokens,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Append a turn, then evict the oldest turns until the window fits.
    pub fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        self.fit_to(self.max_tokens);
    }

    /// Evict oldest turns until the window holds at most `budget` tokens.
    ///
    /// Returns the evicted turns, oldest first.
    pub fn fit_to(&mut self, budget: usize) -> Vec<Turn> {
        let mut evicted = Vec::new();
        let mut total = self.token_count();
        while total > budget && self.turns.len() > 1 {
            if let Some(oldest) = self.turns.pop_front() {
                tracing::debug!("Evicting {} turn from memory", oldest.role);
                total -= oldest.token_count();
                evicted.push(oldest);
            }
        }
        evicted
    }

    pub fn token_count(&self) -> usize {
        self.turns.iter().map(Turn::token_count).sum()
    }

    pub fn turns(&self) -> impl DoubleEndedIterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    pub fn to_request_messages(&self) -> Vec<ChatCompletionRequestMessage> {
        self.turns.iter().map(Turn::to_request_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn turn(role: Role, words: usize) -> Turn {
        Turn::new(role, vec!["word"; words].join(" "))
    }

    #[test]
    fn test_push_keeps_everything_within_budget() {
        let mut memory = ConversationMemory::new(1_000);
        memory.push(Turn::new(Role::User, "Hello!".into()));
        memory.push(Turn::new(Role::Assistant, "Hi there".into()));
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.to_request_messages().len(), 2);
    }

    #[test]
    fn test_push_evicts_oldest_first() {
        let mut memory = ConversationMemory::new(80);
        memory.push(turn(Role::User, 50));
        memory.push(turn(Role::Assistant, 50));
        memory.push(Turn::new(Role::User, "latest".into()));

        assert!(memory.token_count() <= 80);
        let last = memory.turns().last().unwrap();
        assert_eq!(last.content, "latest");
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.turns().next().unwrap().role, Role::Assistant);
    }

    #[test]
    fn test_most_recent_turn_survives_even_when_oversized() {
        let mut memory = ConversationMemory::new(5);
        memory.push(turn(Role::User, 3));
        memory.push(turn(Role::Assistant, 100));
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.turns().next().unwrap().role, Role::Assistant);
    }

    #[test]
    fn test_fit_to_returns_evicted_turns_in_order() {
        let mut memory = ConversationMemory::new(10_000);
        for i in 0..4 {
            memory.push(Turn::new(Role::User, format!("message number {i}")));
        }
        let evicted = memory.fit_to(10);
        assert!(!evicted.is_empty());
        assert_eq!(evicted[0].content, "message number 0");
        assert!(memory.token_count() <= 10 || memory.len() == 1);
    }

    #[test]
    fn test_role_parse_and_display() {
        assert_eq!(Role::parse("Assistant"), Some(Role::Assistant));
        assert_eq!(Role::parse("you"), Some(Role::User));
        assert_eq!(Role::parse("narrator"), None);
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Assistant.label(), "Assistant");
    }

    #[test]
    fn test_count_tokens_is_monotonic() {
        assert_eq!(count_tokens(""), 0);
        assert!(count_tokens("a much longer sentence with many words") > count_tokens("short"));
    }
}
