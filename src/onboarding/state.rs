//! Onboarding phases and the persisted per-user session.

use serde::{Deserialize, Serialize};

use crate::llm::{ChatMessage, Role};

use super::model::ExtractedData;

/// The phases of the onboarding conversation, in the order the client
/// walks them. The client decides when to move on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Operations,
    Goals,
    Habits,
    Metrics,
    Schedule,
    Complete,
}

impl Phase {
    /// Whether this phase is terminal (onboarding is done).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete)
    }

    /// Whether a conversation turn may be taken in this phase.
    pub fn is_conversational(&self) -> bool {
        !self.is_terminal()
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Operations => "operations",
            Self::Goals => "goals",
            Self::Habits => "habits",
            Self::Metrics => "metrics",
            Self::Schedule => "schedule",
            Self::Complete => "complete",
        };
        write!(f, "{s}")
    }
}

/// One message in the onboarding transcript.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

impl ConversationTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ConversationTurn> for ChatMessage {
    fn from(turn: &ConversationTurn) -> Self {
        ChatMessage {
            role: turn.role,
            content: turn.content.clone(),
        }
    }
}

/// Persisted onboarding session, one per user.
///
/// Overwritten after every turn; never deleted here.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub current_phase: Phase,
    #[serde(default)]
    pub extracted_data: ExtractedData,
    /// Append-only transcript. Never truncated.
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
}

impl SessionState {
    pub fn new(
        current_phase: Phase,
        extracted_data: ExtractedData,
        conversation_history: Vec<ConversationTurn>,
    ) -> Self {
        Self {
            current_phase,
            extracted_data,
            conversation_history,
        }
    }

    /// Transcript as LLM chat messages.
    pub fn chat_messages(&self) -> Vec<ChatMessage> {
        self.conversation_history.iter().map(ChatMessage::from).collect()
    }
}
