//! Completion invoker: one model call per turn.
//!
//! Wraps an `LlmProvider` with a timeout and reduces the response to at most
//! one text block and at most one tool call.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::llm::{
    ChatMessage, CompletionRequest, LlmProvider, SystemPrompt, ToolCall, ToolCompletionRequest,
    ToolDefinition,
};

/// Token usage from an LLM call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// What one model call produced.
#[derive(Debug, Clone, Default)]
pub struct CompletionOutcome {
    pub text: Option<String>,
    pub tool_call: Option<ToolCall>,
    pub usage: TokenUsage,
}

/// Single-attempt wrapper around the LLM provider. No retries.
pub struct CompletionInvoker {
    llm: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl CompletionInvoker {
    pub fn new(llm: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { llm, timeout }
    }

    /// Run a tool-enabled completion over the conversation.
    pub async fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        system: SystemPrompt,
        tools: Vec<ToolDefinition>,
        max_tokens: u32,
    ) -> Result<CompletionOutcome, LlmError> {
        let cacheable = system.is_cacheable();
        let request = ToolCompletionRequest::new(messages, tools)
            .with_system(system)
            .with_max_tokens(max_tokens);

        let response = tokio::time::timeout(self.timeout, self.llm.complete_with_tools(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;

        let usage = TokenUsage {
            input_tokens: response.input_tokens,
            output_tokens: response.output_tokens,
        };
        self.log_usage(usage, cacheable);

        if response.tool_calls.len() > 1 {
            warn!(
                count = response.tool_calls.len(),
                "Model returned several tool calls, keeping the first"
            );
        }

        let text = response
            .content
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        Ok(CompletionOutcome {
            text,
            tool_call: response.tool_calls.into_iter().next(),
            usage,
        })
    }

    /// Run a plain completion (no tools) and return the raw text.
    pub async fn invoke_text(
        &self,
        messages: Vec<ChatMessage>,
        system: SystemPrompt,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let cacheable = system.is_cacheable();
        let request = CompletionRequest::new(messages)
            .with_system(system)
            .with_max_tokens(max_tokens)
            .with_temperature(temperature);

        let response = tokio::time::timeout(self.timeout, self.llm.complete(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout))??;

        self.log_usage(
            TokenUsage {
                input_tokens: response.input_tokens,
                output_tokens: response.output_tokens,
            },
            cacheable,
        );
        Ok(response.content)
    }

    fn log_usage(&self, usage: TokenUsage, cacheable: bool) {
        let (input_cost, output_cost) = self.llm.cost_per_token();
        let cost = input_cost * Decimal::from(usage.input_tokens)
            + output_cost * Decimal::from(usage.output_tokens);
        debug!(
            model = self.llm.model_name(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            total_tokens = usage.total(),
            cacheable,
            cost_usd = %cost,
            "LLM call complete"
        );
    }
}
