//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::onboarding::generator::GeneratedSystem;
use crate::onboarding::state::{Phase, SessionState};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse a phase string from the DB.
fn str_to_phase(s: &str) -> Phase {
    serde_json::from_value(serde_json::Value::String(s.to_string())).unwrap_or_else(|_| {
        warn!(phase = s, "Unknown phase in stored session, defaulting to operations");
        Phase::default()
    })
}

/// Map a libsql Row to a SessionState.
///
/// Column order: 0:current_phase, 1:extracted_data, 2:conversation_history
fn row_to_session(row: &libsql::Row) -> Result<SessionState, DatabaseError> {
    let phase_str: String = row
        .get(0)
        .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;
    let extracted_str: String = row
        .get(1)
        .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;
    let history_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;

    let extracted_data = serde_json::from_str(&extracted_str)
        .map_err(|e| DatabaseError::Serialization(format!("extracted_data: {e}")))?;
    let conversation_history = serde_json::from_str(&history_str)
        .map_err(|e| DatabaseError::Serialization(format!("conversation_history: {e}")))?;

    Ok(SessionState {
        current_phase: str_to_phase(&phase_str),
        extracted_data,
        conversation_history,
    })
}

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Onboarding sessions ─────────────────────────────────────────

    async fn get_session(&self, user_id: &str) -> Result<Option<SessionState>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT current_phase, extracted_data, conversation_history
                 FROM onboarding_sessions WHERE user_id = ?1",
                params![user_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_session: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => row_to_session(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_session: {e}"))),
        }
    }

    async fn upsert_session(
        &self,
        user_id: &str,
        state: &SessionState,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let extracted = serde_json::to_string(&state.extracted_data)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
        let history = serde_json::to_string(&state.conversation_history)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO onboarding_sessions
                (user_id, current_phase, extracted_data, conversation_history, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (user_id) DO UPDATE SET
                current_phase = ?2, extracted_data = ?3, conversation_history = ?4, updated_at = ?5",
            params![
                user_id,
                state.current_phase.to_string(),
                extracted,
                history,
                now
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_session: {e}")))?;

        debug!(
            user_id,
            phase = %state.current_phase,
            turns = state.conversation_history.len(),
            "Onboarding session saved"
        );
        Ok(())
    }

    // ── Draft systems ───────────────────────────────────────────────

    async fn save_draft_system(
        &self,
        draft_id: &str,
        system: &GeneratedSystem,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let payload = serde_json::to_string(system)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        conn.execute(
            "INSERT INTO draft_systems (draft_id, payload, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (draft_id) DO UPDATE SET payload = ?2, created_at = ?3",
            params![draft_id, payload, now],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("save_draft_system: {e}")))?;
        Ok(())
    }

    async fn get_draft_system(
        &self,
        draft_id: &str,
    ) -> Result<Option<GeneratedSystem>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT payload FROM draft_systems WHERE draft_id = ?1",
                params![draft_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_draft_system: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let payload: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("get_draft_system: {e}")))?;
                let system = serde_json::from_str(&payload)
                    .map_err(|e| DatabaseError::Serialization(e.to_string()))?;
                Ok(Some(system))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_draft_system: {e}"))),
        }
    }
}
