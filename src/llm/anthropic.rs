//! Anthropic Messages API provider.
//!
//! Talks to `/v1/messages` directly over reqwest so the system prompt can be
//! sent as a content block with `cache_control` when it is cacheable.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::LlmError;

use super::provider::{
    ChatMessage, CompletionRequest, CompletionResponse, FinishReason, LlmProvider, Role,
    SystemPrompt, ToolCall, ToolCompletionRequest, ToolCompletionResponse, ToolDefinition,
};

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Anthropic provider over the Messages API.
pub struct AnthropicProvider {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl AnthropicProvider {
    pub fn new(api_key: SecretString, model: &str, timeout: Duration) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key,
            model: model.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout,
        })
    }

    /// Point the provider at a different host (proxies, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post_messages(&self, body: &Value) -> Result<MessagesResponse, LlmError> {
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.timeout)
                } else {
                    LlmError::RequestFailed {
                        provider: PROVIDER.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                401 | 403 => LlmError::AuthFailed {
                    provider: PROVIDER.to_string(),
                },
                429 => LlmError::RateLimited {
                    provider: PROVIDER.to_string(),
                    retry_after,
                },
                _ => LlmError::RequestFailed {
                    provider: PROVIDER.to_string(),
                    reason: format!("HTTP {status}: {body}"),
                },
            });
        }

        response
            .json::<MessagesResponse>()
            .await
            .map_err(|e| LlmError::InvalidResponse {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn cost_per_token(&self) -> (Decimal, Decimal) {
        model_pricing(&self.model)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = build_request_body(
            &self.model,
            &request.messages,
            request.system.as_ref(),
            &[],
            request.max_tokens,
            request.temperature,
        );
        let response = self.post_messages(&body).await?;
        let parsed = response.into_tool_response();
        Ok(CompletionResponse {
            content: parsed.content.unwrap_or_default(),
            input_tokens: parsed.input_tokens,
            output_tokens: parsed.output_tokens,
            finish_reason: parsed.finish_reason,
            response_id: parsed.response_id,
        })
    }

    async fn complete_with_tools(
        &self,
        request: ToolCompletionRequest,
    ) -> Result<ToolCompletionResponse, LlmError> {
        let body = build_request_body(
            &self.model,
            &request.messages,
            request.system.as_ref(),
            &request.tools,
            request.max_tokens,
            request.temperature,
        );
        debug!(tools = request.tools.len(), messages = request.messages.len(), "Anthropic tool request");
        let response = self.post_messages(&body).await?;
        Ok(response.into_tool_response())
    }
}

/// Per-token (input, output) USD pricing by model family.
fn model_pricing(model: &str) -> (Decimal, Decimal) {
    if model.contains("opus") {
        (dec!(0.000015), dec!(0.000075))
    } else if model.contains("haiku") {
        (dec!(0.0000008), dec!(0.000004))
    } else {
        (dec!(0.000003), dec!(0.000015))
    }
}

/// Build the JSON body for `/v1/messages`.
fn build_request_body(
    model: &str,
    messages: &[ChatMessage],
    system: Option<&SystemPrompt>,
    tools: &[ToolDefinition],
    max_tokens: Option<u32>,
    temperature: Option<f32>,
) -> Value {
    let messages: Vec<Value> = messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            json!({ "role": role, "content": m.content })
        })
        .collect();

    let mut body = json!({
        "model": model,
        "max_tokens": max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        "messages": messages,
    });

    if let Some(system) = system {
        let mut block = json!({ "type": "text", "text": system.text() });
        if system.is_cacheable() {
            block["cache_control"] = json!({ "type": "ephemeral" });
        }
        body["system"] = json!([block]);
    }

    if !tools.is_empty() {
        body["tools"] = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();
    }

    if let Some(temperature) = temperature {
        body["temperature"] = json!(temperature);
    }

    body
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Usage,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

impl MessagesResponse {
    fn into_tool_response(self) -> ToolCompletionResponse {
        let mut content: Option<String> = None;
        let mut dropped_text = 0;
        let mut tool_calls = Vec::new();
        for block in self.content {
            match block {
                ContentBlock::Text { text } if content.is_none() => content = Some(text),
                ContentBlock::Text { .. } => dropped_text += 1,
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                    id,
                    name,
                    arguments: input,
                }),
                ContentBlock::Other => {}
            }
        }

        if dropped_text > 0 {
            warn!(dropped = dropped_text, "Response had several text blocks, keeping the first");
        }

        let finish_reason = match self.stop_reason.as_deref() {
            Some("end_turn") | Some("stop_sequence") => FinishReason::Stop,
            Some("max_tokens") => FinishReason::Length,
            Some("tool_use") => FinishReason::ToolUse,
            _ => FinishReason::Unknown,
        };

        ToolCompletionResponse {
            content,
            tool_calls,
            input_tokens: self.usage.input_tokens,
            output_tokens: self.usage.output_tokens,
            finish_reason,
            response_id: self.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use super::*;

    #[test]
    fn cacheable_system_gets_cache_control() {
        let system = SystemPrompt::Cacheable(Cow::Borrowed("You are helpful."));
        let body = build_request_body(
            "claude-test",
            &[ChatMessage::user("hi")],
            Some(&system),
            &[],
            None,
            None,
        );
        assert_eq!(body["system"][0]["text"], "You are helpful.");
        assert_eq!(body["system"][0]["cache_control"]["type"], "ephemeral");
        assert_eq!(body["max_tokens"], DEFAULT_MAX_TOKENS);
        assert!(body.get("tools").is_none());
    }

    #[test]
    fn fresh_system_has_no_cache_control() {
        let system = SystemPrompt::Fresh("Focus on Health".to_string());
        let body = build_request_body("m", &[], Some(&system), &[], Some(50), Some(0.5));
        assert!(body["system"][0].get("cache_control").is_none());
        assert_eq!(body["max_tokens"], 50);
        assert!(body["temperature"].is_number());
    }

    #[test]
    fn tools_use_input_schema_key() {
        let tool = ToolDefinition {
            name: "create_habits".to_string(),
            description: "d".to_string(),
            parameters: json!({"type": "object"}),
        };
        let body = build_request_body(
            "m",
            &[ChatMessage::user("a"), ChatMessage::assistant("b")],
            None,
            &[tool],
            None,
            None,
        );
        assert_eq!(body["tools"][0]["name"], "create_habits");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
        assert_eq!(body["messages"][1]["role"], "assistant");
    }

    #[test]
    fn parses_text_and_tool_use_blocks() {
        let raw = json!({
            "id": "msg_1",
            "content": [
                {"type": "text", "text": "Great list!"},
                {"type": "tool_use", "id": "tu_1", "name": "create_operations",
                 "input": {"operations": [{"name": "Health"}]}},
                {"type": "thinking", "thinking": "..."}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 7}
        });
        let response: MessagesResponse = serde_json::from_value(raw).unwrap();
        let parsed = response.into_tool_response();
        assert_eq!(parsed.content.as_deref(), Some("Great list!"));
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "create_operations");
        assert_eq!(parsed.finish_reason, FinishReason::ToolUse);
        assert_eq!(parsed.input_tokens, 12);
        assert_eq!(parsed.response_id.as_deref(), Some("msg_1"));
    }

    #[test]
    fn keeps_only_first_text_block() {
        let raw = json!({
            "content": [
                {"type": "text", "text": "Let me record that."},
                {"type": "tool_use", "id": "tu_1", "name": "create_habits",
                 "input": {"habits": [{"name": "Run"}]}},
                {"type": "text", "text": "Anything else?"}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 5, "output_tokens": 5}
        });
        let response: MessagesResponse = serde_json::from_value(raw).unwrap();
        let parsed = response.into_tool_response();
        assert_eq!(parsed.content.as_deref(), Some("Let me record that."));
        assert_eq!(parsed.tool_calls.len(), 1);
        assert_eq!(parsed.tool_calls[0].name, "create_habits");
    }

    #[test]
    fn pricing_by_family() {
        let (sonnet_in, _) = model_pricing("claude-sonnet-4-20250514");
        let (opus_in, _) = model_pricing("claude-opus-4");
        assert!(opus_in > sonnet_in);
    }
}
