//! Per-connection conversation history with a sliding retention window.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Ordered turns, always starting with exactly one system turn.
///
/// The system turn is created with the state and never removed; trimming only
/// ever drops the oldest non-system turns.
#[derive(Debug, Clone)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::system(system_prompt)],
        }
    }

    /// Append a user or assistant turn. A second system turn is rejected.
    pub fn append(&mut self, turn: Turn) -> anyhow::Result<()> {
        if turn.role == Role::System {
            anyhow::bail!("conversation already has a system turn");
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Keep the system turn plus the most recent `limit` turns.
    pub fn trim(&mut self, limit: usize) {
        let excess = (self.turns.len() - 1).saturating_sub(limit);
        if excess > 0 {
            self.turns.drain(1..1 + excess);
        }
    }

    /// Current turns, system turn first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn snapshot(&self) -> Vec<Turn> {
        self.turns.clone()
    }
}
