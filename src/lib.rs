//! LifeOS onboarding: phase-driven LLM extraction core.

pub mod config;
pub mod error;
pub mod llm;
pub mod onboarding;
pub mod store;
