//! Conversation log: append-only except for rolling back a failed question

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::providers::types::{ChatMessage, ChatRole};

/// One turn of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: ChatRole,
    /// Markdown text
    pub content: String,
    /// Backend that produced an assistant turn (display only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
            provider: None,
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            provider: Some(provider.into()),
            created_at: Utc::now(),
        }
    }

    /// The turn as a provider-agnostic message (attribution dropped)
    pub fn to_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Ordered log of turns for one session
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Remove the most recently appended user turn and nothing else
    pub fn rollback_last_user_turn(&mut self) -> Option<Turn> {
        let idx = self.turns.iter().rposition(|t| t.role == ChatRole::User)?;
        Some(self.turns.remove(idx))
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_keeps_order() {
        let mut convo = Conversation::new();
        convo.append(Turn::user("q1"));
        convo.append(Turn::assistant("a1", "groq"));
        convo.append(Turn::user("q2"));
        let contents: Vec<&str> = convo.turns().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["q1", "a1", "q2"]);
        assert_eq!(convo.turns()[1].provider.as_deref(), Some("groq"));
    }

    #[test]
    fn test_rollback_restores_previous_shape() {
        let mut convo = Conversation::new();
        convo.append(Turn::user("q1"));
        convo.append(Turn::assistant("a1", "gemini"));
        let before = convo.snapshot();

        convo.append(Turn::user("q2"));
        let removed = convo.rollback_last_user_turn().unwrap();
        assert_eq!(removed.content, "q2");
        assert_eq!(convo.snapshot(), before);
    }

    #[test]
    fn test_rollback_removes_only_latest_user_turn() {
        let mut convo = Conversation::new();
        convo.append(Turn::user("q1"));
        convo.append(Turn::user("q2"));
        convo.rollback_last_user_turn();
        assert_eq!(convo.len(), 1);
        assert_eq!(convo.turns()[0].content, "q1");
    }

    #[test]
    fn test_rollback_on_empty_log() {
        let mut convo = Conversation::new();
        assert!(convo.rollback_last_user_turn().is_none());
        convo.append(Turn::assistant("greeting", "groq"));
        assert!(convo.rollback_last_user_turn().is_none());
        assert_eq!(convo.len(), 1);
    }

    #[test]
    fn test_to_message_drops_attribution() {
        let msg = Turn::assistant("answer", "cerebras").to_message();
        assert_eq!(msg, ChatMessage::assistant("answer"));
    }
}
