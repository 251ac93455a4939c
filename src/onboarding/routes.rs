//! REST endpoints for conversational and batch onboarding.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};

use crate::error::OnboardingError;

use super::generator::{GoalDetail, SystemGenerator};
use super::manager::{OnboardingManager, TurnRequest};

/// Header carrying the caller's identity.
pub const USER_ID_HEADER: &str = "x-user-id";

/// User id when the header is absent (single-user mode).
pub const DEFAULT_USER_ID: &str = "default";

/// Shared state for onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub manager: Arc<OnboardingManager>,
    pub generator: Arc<SystemGenerator>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    #[serde(default)]
    goal_details: Vec<GoalDetail>,
    #[serde(default)]
    draft_id: Option<String>,
}

fn user_id(headers: &HeaderMap) -> String {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_USER_ID)
        .to_string()
}

impl IntoResponse for OnboardingError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::InvalidPhase(_) | Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Generation(_) | Self::Llm(_) => StatusCode::BAD_GATEWAY,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(status = status.as_u16(), error = %self, "Onboarding request failed");
        } else {
            warn!(status = status.as_u16(), error = %self, "Onboarding request rejected");
        }
        (status, Json(json!({"error": self.to_string()}))).into_response()
    }
}

/// POST /api/onboarding/chat
///
/// Takes one conversational turn for the calling user.
async fn chat(
    State(state): State<OnboardingRouteState>,
    headers: HeaderMap,
    Json(request): Json<TurnRequest>,
) -> Result<impl IntoResponse, OnboardingError> {
    let user_id = user_id(&headers);
    let response = state.manager.advance(&user_id, request).await?;
    Ok(Json(response))
}

/// POST /api/onboarding/generate
///
/// Builds a full draft system from a list of goals. With a `draftId` the
/// result is also stored in the background.
async fn generate(
    State(state): State<OnboardingRouteState>,
    Json(request): Json<GenerateRequest>,
) -> Result<impl IntoResponse, OnboardingError> {
    let system = state.generator.generate_system(&request.goal_details).await?;
    if let Some(draft_id) = request.draft_id.filter(|id| !id.trim().is_empty()) {
        state.generator.stash_draft(draft_id, system.clone());
    }
    Ok(Json(system))
}

/// GET /api/onboarding/session
///
/// Returns the caller's stored session, or 404 if they have none.
async fn get_session(
    State(state): State<OnboardingRouteState>,
    headers: HeaderMap,
) -> Result<Response, OnboardingError> {
    let user_id = user_id(&headers);
    Ok(match state.manager.get_session(&user_id).await? {
        Some(session) => Json(session).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "No onboarding session yet"})),
        )
            .into_response(),
    })
}

/// GET /health
async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/api/onboarding/chat", post(chat))
        .route("/api/onboarding/generate", post(generate))
        .route("/api/onboarding/session", get(get_session))
        .route("/health", get(health))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{HeaderValue, Request};
    use rust_decimal::Decimal;
    use tower::ServiceExt;

    use super::*;
    use crate::config::OnboardingConfig;
    use crate::error::{DatabaseError, LlmError};
    use crate::llm::{
        CompletionRequest, CompletionResponse, LlmProvider, ToolCompletionRequest,
        ToolCompletionResponse,
    };
    use crate::onboarding::invoker::CompletionInvoker;
    use crate::store::LibSqlBackend;

    /// Provider that is never reachable.
    struct OfflineLlm;

    #[async_trait]
    impl LlmProvider for OfflineLlm {
        fn model_name(&self) -> &str {
            "offline"
        }
        fn cost_per_token(&self) -> (Decimal, Decimal) {
            (Decimal::ZERO, Decimal::ZERO)
        }
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            Err(LlmError::Timeout(Duration::from_secs(1)))
        }
        async fn complete_with_tools(
            &self,
            _request: ToolCompletionRequest,
        ) -> Result<ToolCompletionResponse, LlmError> {
            Err(LlmError::Timeout(Duration::from_secs(1)))
        }
    }

    async fn test_router() -> Router {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let invoker = Arc::new(CompletionInvoker::new(
            Arc::new(OfflineLlm),
            Duration::from_secs(1),
        ));
        let manager = Arc::new(OnboardingManager::new(
            db.clone(),
            Arc::clone(&invoker),
            OnboardingConfig::default(),
        ));
        let generator = Arc::new(SystemGenerator::new(db, invoker, 4096));
        onboarding_routes(OnboardingRouteState { manager, generator })
    }

    fn json_post(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let response = test_router()
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_survives_offline_model() {
        let response = test_router()
            .await
            .oneshot(json_post(
                "/api/onboarding/chat",
                json!({"message": "hi", "phase": "schedule"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn generate_with_offline_model_is_bad_gateway() {
        let response = test_router()
            .await
            .oneshot(json_post(
                "/api/onboarding/generate",
                json!({"goalDetails": [{"goal": "run a marathon", "details": "train 4x a week"}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn unknown_phase_is_rejected_by_extractor() {
        let response = test_router()
            .await
            .oneshot(json_post(
                "/api/onboarding/chat",
                json!({"message": "hi", "phase": "onboarding"}),
            ))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[test]
    fn user_id_defaults_when_missing_or_blank() {
        let mut headers = HeaderMap::new();
        assert_eq!(user_id(&headers), DEFAULT_USER_ID);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        assert_eq!(user_id(&headers), DEFAULT_USER_ID);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("alice"));
        assert_eq!(user_id(&headers), "alice");
    }

    #[test]
    fn errors_map_to_status_codes() {
        let cases = [
            (OnboardingError::InvalidPhase("complete".into()), StatusCode::BAD_REQUEST),
            (OnboardingError::InvalidRequest("empty".into()), StatusCode::BAD_REQUEST),
            (OnboardingError::Generation("bad json".into()), StatusCode::BAD_GATEWAY),
            (
                OnboardingError::Llm(LlmError::AuthFailed {
                    provider: "anthropic".into(),
                }),
                StatusCode::BAD_GATEWAY,
            ),
            (
                OnboardingError::Database(DatabaseError::Query("locked".into())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn generate_request_accepts_camel_case() {
        let request: GenerateRequest = serde_json::from_value(json!({
            "goalDetails": [{"goal": "bulk to 145lbs", "details": "eat more protein"}],
            "draftId": "draft-1"
        }))
        .unwrap();
        assert_eq!(request.goal_details.len(), 1);
        assert_eq!(request.draft_id.as_deref(), Some("draft-1"));
    }
}
