//! Conversation context for dispatch
//!
//! A fixed system turn is always prepended, followed by at most
//! [`CONTEXT_WINDOW_TURNS`] prior turns and the current user turn. Older
//! turns are truncated, never summarized.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prior turns supplied as dispatch context
pub const CONTEXT_WINDOW_TURNS: usize = 10;

/// Persona and language support for every dispatch
pub const SYSTEM_PROMPT: &str = "You are Maya, a helpful AI assistant. You can control the phone, \
read messages, make calls, and help with various tasks. Be concise and friendly. \
Support both English and Bengali.";

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One exchange in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Wire message for chat backends
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
        }
    }
}

/// Build the wire messages for `turns`, whose last element is the current turn
pub fn build_messages(turns: &[ConversationTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(CONTEXT_WINDOW_TURNS + 2);
    messages.push(ChatMessage::new("system", SYSTEM_PROMPT));

    let Some((current, prior)) = turns.split_last() else {
        return messages;
    };

    let skip = prior.len().saturating_sub(CONTEXT_WINDOW_TURNS);
    for turn in prior[skip..].iter().chain(std::iter::once(current)) {
        let role = match turn.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };
        messages.push(ChatMessage::new(role, &turn.content));
    }

    messages
}

/// Rolling window of the most recent turns
#[derive(Debug, Clone, Default)]
pub struct ConversationWindow {
    turns: VecDeque<ConversationTurn>,
}

impl ConversationWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, dropping the oldest beyond the window
    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push_back(turn);
        while self.turns.len() > CONTEXT_WINDOW_TURNS {
            self.turns.pop_front();
        }
    }

    /// Prior turns followed by `current`
    pub fn context_with(&self, current: &ConversationTurn) -> Vec<ConversationTurn> {
        self.turns
            .iter()
            .cloned()
            .chain(std::iter::once(current.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_turn_always_first() {
        let messages = build_messages(&[ConversationTurn::user("hi")]);
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, "system");
        assert_eq!(messages[0].content, SYSTEM_PROMPT);
        assert_eq!(messages[1], ChatMessage::new("user", "hi"));
    }

    #[test]
    fn test_prior_turns_truncated_to_window() {
        let mut turns: Vec<ConversationTurn> = (0..15)
            .map(|i| {
                if i % 2 == 0 {
                    ConversationTurn::user(format!("q{i}"))
                } else {
                    ConversationTurn::assistant(format!("a{i}"))
                }
            })
            .collect();
        turns.push(ConversationTurn::user("current"));

        let messages = build_messages(&turns);
        assert_eq!(messages.len(), 1 + CONTEXT_WINDOW_TURNS + 1);
        assert_eq!(messages[1].content, "a5");
        assert_eq!(messages.last().map(|m| m.content.as_str()), Some("current"));
    }

    #[test]
    fn test_window_keeps_latest_turns() {
        let mut window = ConversationWindow::new();
        for i in 0..12 {
            window.push(ConversationTurn::user(format!("t{i}")));
        }
        assert_eq!(window.len(), CONTEXT_WINDOW_TURNS);

        let context = window.context_with(&ConversationTurn::user("now"));
        assert_eq!(context.len(), CONTEXT_WINDOW_TURNS + 1);
        assert_eq!(context[0].content, "t2");
        assert_eq!(context[CONTEXT_WINDOW_TURNS].content, "now");
    }

    #[test]
    fn test_empty_turns_yield_only_system() {
        assert_eq!(build_messages(&[]).len(), 1);
    }
}
