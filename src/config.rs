//! Configuration types, read from the environment.

use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default model for both the turn and batch paths.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Process-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub api_key: SecretString,
    pub model: String,
    pub port: u16,
    pub db_path: String,
    pub onboarding: OnboardingConfig,
}

impl ServerConfig {
    /// Load from environment variables. Only `ANTHROPIC_API_KEY` is required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("ANTHROPIC_API_KEY")
            .map_err(|_| ConfigError::MissingEnvVar("ANTHROPIC_API_KEY".to_string()))?;

        let model = std::env::var("ONBOARD_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let port = match std::env::var("ONBOARD_PORT") {
            Ok(raw) => raw.parse::<u16>().map_err(|e| ConfigError::InvalidValue {
                key: "ONBOARD_PORT".to_string(),
                message: e.to_string(),
            })?,
            Err(_) => 8080,
        };

        let db_path =
            std::env::var("ONBOARD_DB_PATH").unwrap_or_else(|_| "./data/onboard.db".to_string());

        Ok(Self {
            api_key: SecretString::from(api_key),
            model,
            port,
            db_path,
            onboarding: OnboardingConfig::from_env(),
        })
    }
}

/// Tuning for the onboarding LLM calls.
#[derive(Debug, Clone)]
pub struct OnboardingConfig {
    /// Max tokens for a conversational turn.
    pub turn_max_tokens: u32,
    /// Max tokens for a full-system batch generation.
    pub batch_max_tokens: u32,
    /// A completion taking longer than this is treated as failed.
    pub llm_timeout: Duration,
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            turn_max_tokens: 1024,
            batch_max_tokens: 4096,
            llm_timeout: Duration::from_secs(60),
        }
    }
}

impl OnboardingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let turn_max_tokens = std::env::var("ONBOARD_TURN_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.turn_max_tokens);

        let batch_max_tokens = std::env::var("ONBOARD_BATCH_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.batch_max_tokens);

        let llm_timeout = std::env::var("ONBOARD_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.llm_timeout);

        Self {
            turn_max_tokens,
            batch_max_tokens,
            llm_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn onboarding_defaults() {
        let config = OnboardingConfig::default();
        assert_eq!(config.turn_max_tokens, 1024);
        assert_eq!(config.batch_max_tokens, 4096);
        assert_eq!(config.llm_timeout, Duration::from_secs(60));
    }
}
