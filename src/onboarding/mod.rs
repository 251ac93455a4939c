//! Onboarding system: phase-driven extraction of a user's personal
//! operating system.
//!
//! A conversational path walks the user through operations, goals, habits,
//! metrics and schedule; the model records what it learns through tool
//! calls that are normalized into drafts and merged into a per-user session.
//! A batch path builds the whole system from a list of goals in one call.

pub mod generator;
pub mod invoker;
pub mod manager;
pub mod model;
pub mod normalizer;
pub mod prompts;
pub mod routes;
pub mod state;
pub mod tools;

pub use generator::{GeneratedSystem, GoalDetail, SystemGenerator};
pub use invoker::{CompletionInvoker, CompletionOutcome, TokenUsage};
pub use manager::{OnboardingManager, TurnContext, TurnRequest, TurnResponse};
pub use model::ExtractedData;
pub use routes::{OnboardingRouteState, onboarding_routes};
pub use state::{ConversationTurn, Phase, SessionState};
pub use tools::ToolInvocation;
