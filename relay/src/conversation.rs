//! Conversation history
//!
//! Streamed assistant text for one turn arrives in pieces. The pieces are
//! appended to a single assistant turn until the turn completes or a
//! non-assistant message is recorded.

use serde::{Deserialize, Serialize};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// One entry of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub text: String,
}

/// Ordered conversation turns
#[derive(Debug, Default, Clone)]
pub struct ConversationLog {
    turns: Vec<ConversationTurn>,
    /// The last turn is an assistant turn still receiving text
    open_assistant: bool,
}

impl ConversationLog {
    /// Create an empty log
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a user message
    pub fn push_user(&mut self, text: impl Into<String>) {
        self.push(Role::User, text.into());
    }

    /// Record a system message
    pub fn push_system(&mut self, text: impl Into<String>) {
        self.push(Role::System, text.into());
    }

    /// Append streamed assistant text
    ///
    /// Returns the assistant turn's text so far.
    pub fn append_assistant(&mut self, text: &str) -> &str {
        if !self.open_assistant {
            self.turns.push(ConversationTurn {
                role: Role::Assistant,
                text: String::new(),
            });
            self.open_assistant = true;
        }

        let idx = self.turns.len() - 1;
        let turn = &mut self.turns[idx];
        turn.text.push_str(text);
        &turn.text
    }

    /// Close the current assistant turn
    ///
    /// The next assistant text starts a new turn.
    pub fn complete_turn(&mut self) {
        self.open_assistant = false;
    }

    /// All turns, oldest first
    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Most recent turn
    pub fn last(&self) -> Option<&ConversationTurn> {
        self.turns.last()
    }

    /// Number of turns
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn push(&mut self, role: Role, text: String) {
        self.open_assistant = false;
        self.turns.push(ConversationTurn { role, text });
    }
}
