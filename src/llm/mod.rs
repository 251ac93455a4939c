//! LLM integration.
//!
//! The onboarding core only sees the `LlmProvider` trait. `AnthropicProvider`
//! is the production backend.

pub mod anthropic;
pub mod provider;

pub use anthropic::AnthropicProvider;
pub use provider::*;

use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    Anthropic,
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub timeout: Duration,
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::Anthropic => {
            let provider =
                AnthropicProvider::new(config.api_key.clone(), &config.model, config.timeout)?;
            tracing::info!("Using Anthropic (model: {})", config.model);
            Ok(Arc::new(provider))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_provider_constructs_without_network() {
        let config = LlmConfig {
            backend: LlmBackend::Anthropic,
            api_key: secrecy::SecretString::from("test-key"),
            model: "claude-sonnet-4-20250514".to_string(),
            timeout: Duration::from_secs(5),
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model_name(), "claude-sonnet-4-20250514");
    }
}
