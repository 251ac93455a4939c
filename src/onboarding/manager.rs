//! OnboardingManager runs one conversational turn: instruction selection,
//! the model call, extraction, merge and persistence.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::OnboardingConfig;
use crate::error::OnboardingError;
use crate::store::Database;

use super::invoker::{CompletionInvoker, CompletionOutcome};
use super::model::ExtractedData;
use super::normalizer::normalize;
use super::prompts::{phase_entry, phase_instruction};
use super::state::{ConversationTurn, Phase, SessionState};
use super::tools::{ToolInvocation, conversation_tools};

/// Reply used when the model call fails or produces nothing.
pub const FALLBACK_MESSAGE: &str = "I didn't quite catch that. Could you tell me more?";

/// Reply used when the model recorded data but wrote no text.
pub const SAVED_MESSAGE: &str = "Got it, I've saved that. Let's keep going.";

/// What the caller already holds about the session.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnContext {
    #[serde(default)]
    pub conversation_history: Vec<ConversationTurn>,
    #[serde(default)]
    pub extracted_data: ExtractedData,
    /// Operation under discussion during the goals phase.
    #[serde(default)]
    pub current_operation: Option<String>,
}

impl TurnContext {
    /// True when the caller sent neither history nor data.
    fn is_blank(&self) -> bool {
        self.conversation_history.is_empty() && self.extracted_data.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub message: String,
    pub phase: Phase,
    #[serde(default)]
    pub context: Option<TurnContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TurnResponse {
    pub ai_message: String,
    /// Only the drafts produced by this turn.
    pub extracted_data: ExtractedData,
    pub should_advance: bool,
}

/// Phase state machine for conversational onboarding.
///
/// Holds no per-user state: everything comes from the request context or
/// the store and goes back to the store at the end of the turn.
pub struct OnboardingManager {
    db: Arc<dyn Database>,
    invoker: Arc<CompletionInvoker>,
    config: OnboardingConfig,
}

impl OnboardingManager {
    pub fn new(
        db: Arc<dyn Database>,
        invoker: Arc<CompletionInvoker>,
        config: OnboardingConfig,
    ) -> Self {
        Self {
            db,
            invoker,
            config,
        }
    }

    /// Stored session for a user, if any.
    pub async fn get_session(&self, user_id: &str) -> Result<Option<SessionState>, OnboardingError> {
        Ok(self.db.get_session(user_id).await?)
    }

    /// Take one turn.
    ///
    /// 1. Append the user message to the transcript.
    /// 2. Call the model with the phase instruction and every tool.
    /// 3. Normalize the tool invocation, if any, and merge it.
    /// 4. Append the reply and persist the session before returning.
    ///
    /// A failed or empty model call degrades to [`FALLBACK_MESSAGE`]; only a
    /// terminal phase or a failed write is an error.
    pub async fn advance(
        &self,
        user_id: &str,
        request: TurnRequest,
    ) -> Result<TurnResponse, OnboardingError> {
        let TurnRequest {
            message,
            phase,
            context,
        } = request;

        if !phase.is_conversational() {
            return Err(OnboardingError::InvalidPhase(phase.to_string()));
        }

        let context = context.unwrap_or_default();
        let current_operation = context.current_operation.clone();
        let mut session = self.load_session(user_id, phase, context).await?;

        session
            .conversation_history
            .push(ConversationTurn::user(message));

        let system = phase_instruction(phase, current_operation.as_deref());
        let outcome = match self
            .invoker
            .invoke(
                session.chat_messages(),
                system,
                conversation_tools(),
                self.config.turn_max_tokens,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(user_id, %phase, error = %e, "Completion failed, using fallback reply");
                CompletionOutcome::default()
            }
        };

        let CompletionOutcome {
            text, tool_call, ..
        } = outcome;

        let invocation = tool_call.and_then(|call| match ToolInvocation::try_from(&call) {
            Ok(invocation) => Some(invocation),
            Err(e) => {
                warn!(user_id, %phase, tool = %call.name, error = %e, "Ignoring tool call");
                None
            }
        });

        let should_advance = invocation.is_some();
        let new_data = match invocation {
            Some(invocation) => {
                let tool = invocation.name();
                if phase_entry(phase).intended_tool != Some(tool) {
                    debug!(%phase, tool, "Tool outside the phase's intended tool");
                }
                normalize(invocation, &session.extracted_data)
            }
            None => ExtractedData::default(),
        };
        session.extracted_data.merge(new_data.clone());

        let ai_message = match text {
            Some(text) => text,
            None if should_advance => SAVED_MESSAGE.to_string(),
            None => FALLBACK_MESSAGE.to_string(),
        };
        session
            .conversation_history
            .push(ConversationTurn::assistant(ai_message.clone()));
        session.current_phase = phase;

        self.db.upsert_session(user_id, &session).await?;

        info!(
            user_id,
            %phase,
            should_advance,
            turns = session.conversation_history.len(),
            "Onboarding turn complete"
        );

        Ok(TurnResponse {
            ai_message,
            extracted_data: new_data,
            should_advance,
        })
    }

    /// Session to continue from: the caller's context when it carries
    /// anything, otherwise whatever the store holds.
    ///
    /// A failed read is an error. Starting fresh would overwrite the stored
    /// transcript on the next upsert.
    async fn load_session(
        &self,
        user_id: &str,
        phase: Phase,
        context: TurnContext,
    ) -> Result<SessionState, OnboardingError> {
        if !context.is_blank() {
            return Ok(SessionState::new(
                phase,
                context.extracted_data,
                context.conversation_history,
            ));
        }

        match self.db.get_session(user_id).await? {
            Some(stored) => {
                debug!(
                    user_id,
                    turns = stored.conversation_history.len(),
                    "Continuing from stored session"
                );
                Ok(stored)
            }
            None => Ok(SessionState::new(phase, ExtractedData::default(), Vec::new())),
        }
    }
}
