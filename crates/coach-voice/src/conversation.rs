//! Conversation log: the ordered, append-only record of one mock interview.
//!
//! The interviewer (agent) always speaks first; after that roles strictly
//! alternate. Nothing is ever removed or reordered, and the log dies with the
//! session.

use crate::error::{VoiceError, VoiceResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
}

impl Role {
    /// Role name used by chat-style dialogue endpoints.
    pub fn as_chat_role(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Agent => "assistant",
        }
    }
}

/// One message in conversational order. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            created_at: Utc::now(),
        }
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            text: text.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    turns: Vec<Turn>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
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

    pub fn user_turns(&self) -> usize {
        self.turns.iter().filter(|t| t.role == Role::User).count()
    }

    /// Role the next appended turn must have.
    pub fn expected_role(&self) -> Role {
        match self.turns.last() {
            None => Role::Agent,
            Some(t) if t.role == Role::Agent => Role::User,
            Some(_) => Role::Agent,
        }
    }

    pub fn append(&mut self, turn: Turn) -> VoiceResult<()> {
        let expected = self.expected_role();
        if turn.role != expected {
            return Err(VoiceError::TurnOrder(format!(
                "expected {:?} turn at position {}, got {:?}",
                expected,
                self.turns.len(),
                turn.role
            )));
        }
        self.turns.push(turn);
        Ok(())
    }

    /// Append a user turn and the agent's reply together, or neither.
    pub fn append_exchange(&mut self, user: Turn, agent: Turn) -> VoiceResult<()> {
        if self.expected_role() != Role::User || user.role != Role::User || agent.role != Role::Agent {
            return Err(VoiceError::TurnOrder(format!(
                "exchange must be user then agent after an agent turn (log has {} turns)",
                self.turns.len()
            )));
        }
        self.turns.push(user);
        self.turns.push(agent);
        Ok(())
    }
}
