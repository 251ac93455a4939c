//! Provider-agnostic LLM types and the `LlmProvider` trait.

use std::borrow::Cow;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Conversation role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
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

/// System instruction sent alongside the conversation.
///
/// `Cacheable` text is identical across calls and may be stored by the
/// provider's prompt cache. `Fresh` text changes per call and must never be
/// marked for caching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemPrompt {
    Cacheable(Cow<'static, str>),
    Fresh(String),
}

impl SystemPrompt {
    pub fn text(&self) -> &str {
        match self {
            Self::Cacheable(text) => text,
            Self::Fresh(text) => text,
        }
    }

    pub fn is_cacheable(&self) -> bool {
        matches!(self, Self::Cacheable(_))
    }
}

/// A tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the tool input.
    pub parameters: serde_json::Value,
}

/// A tool invocation emitted by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ToolUse,
    Unknown,
}

/// Plain completion request.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub system: Option<SystemPrompt>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            system: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: SystemPrompt) -> Self {
        self.system = Some(system);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Plain completion response.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub content: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: FinishReason,
    pub response_id: Option<String>,
}

/// Completion request that offers tools to the model.
#[derive(Debug, Clone)]
pub struct ToolCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
    pub system: Option<SystemPrompt>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl ToolCompletionRequest {
    pub fn new(messages: Vec<ChatMessage>, tools: Vec<ToolDefinition>) -> Self {
        Self {
            messages,
            tools,
            system: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_system(mut self, system: SystemPrompt) -> Self {
        self.system = Some(system);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response to a tool completion: optional text plus any tool calls.
#[derive(Debug, Clone)]
pub struct ToolCompletionResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub finish_reason: FinishReason,
    pub response_id: Option<String>,
}

/// Backend-agnostic LLM interface.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier, for logs.
    fn model_name(&self) -> &str;

    /// (input, output) cost per token in USD.
    fn cost_per_token(&self) -> (Decimal, Decimal);

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_cacheability() {
        let cached = SystemPrompt::Cacheable(Cow::Borrowed("static"));
        let fresh = SystemPrompt::Fresh("dynamic".to_string());
        assert!(cached.is_cacheable());
        assert!(!fresh.is_cacheable());
        assert_eq!(cached.text(), "static");
        assert_eq!(fresh.text(), "dynamic");
    }

    #[test]
    fn role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        let parsed: Role = serde_json::from_str("\"assistant\"").unwrap();
        assert_eq!(parsed, Role::Assistant);
    }

    #[test]
    fn request_builders() {
        let req = CompletionRequest::new(vec![ChatMessage::user("hi")])
            .with_max_tokens(100)
            .with_temperature(0.2);
        assert_eq!(req.max_tokens, Some(100));
        assert_eq!(req.temperature, Some(0.2));
        assert!(req.system.is_none());
    }
}
