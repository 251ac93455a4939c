//! `Database` trait: the async persistence interface the onboarding core
//! depends on.

use async_trait::async_trait;

use crate::error::DatabaseError;
use crate::onboarding::generator::GeneratedSystem;
use crate::onboarding::state::SessionState;

/// Backend-agnostic persistence for onboarding sessions and draft systems.
///
/// Sessions are keyed by user id. There is no version column: concurrent
/// upserts for the same user resolve last-write-wins.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Onboarding sessions ─────────────────────────────────────────

    /// Load a user's session, `None` if they have never taken a turn.
    async fn get_session(&self, user_id: &str) -> Result<Option<SessionState>, DatabaseError>;

    /// Insert or overwrite a user's session.
    async fn upsert_session(&self, user_id: &str, state: &SessionState)
    -> Result<(), DatabaseError>;

    // ── Draft systems ───────────────────────────────────────────────

    /// Store a batch-generated system under an anonymous draft id.
    async fn save_draft_system(
        &self,
        draft_id: &str,
        system: &GeneratedSystem,
    ) -> Result<(), DatabaseError>;

    /// Load a stored draft system.
    async fn get_draft_system(
        &self,
        draft_id: &str,
    ) -> Result<Option<GeneratedSystem>, DatabaseError>;
}
