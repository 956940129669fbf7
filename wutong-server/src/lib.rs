//! HTTP front end for the WuTong Mountain session engine.
//!
//! The router wraps a [`SessionController`] and exposes the JSON API that
//! `wutong_core::RemoteSession` speaks:
//!
//! | Method | Path                       | Body                         |
//! |--------|----------------------------|------------------------------|
//! | POST   | `/api/start`               |                              |
//! | POST   | `/api/continue`            | `{sessionId, choice, choiceIndex}` |
//! | GET    | `/api/session/:sessionId`  |                              |
//! | POST   | `/api/restore`             | `{sessionId, sessionData}`   |
//! | GET    | `/health`                  |                              |

pub mod config;
pub mod telemetry;

use axum::{
    async_trait,
    extract::{rejection::JsonRejection, FromRequest, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use wutong_core::api::{
    ContinueRequest, ContinueResponse, ErrorBody, RestoreRequest, RestoreResponse, SessionView,
};
use wutong_core::{SessionController, SessionError, StartedSession};

pub use config::ServerConfig;

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    controller: SessionController,
}

impl AppState {
    pub fn new(controller: SessionController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &SessionController {
        &self.controller
    }
}

/// Build the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/start", post(start_session))
        .route("/api/continue", post(continue_session))
        .route("/api/session/:session_id", get(get_session))
        .route("/api/restore", post(restore_session))
        .route("/health", get(health_check))
        .with_state(state)
}

/// A session error on its way out as an HTTP response.
#[derive(Debug)]
pub struct ApiError {
    error: SessionError,
    context: &'static str,
}

impl ApiError {
    fn new(context: &'static str) -> impl FnOnce(SessionError) -> Self {
        move |error| Self { error, context }
    }

    /// Status code and body for this error.
    pub fn parts(&self) -> (StatusCode, ErrorBody) {
        match &self.error {
            SessionError::NotFound(_) => (
                StatusCode::NOT_FOUND,
                ErrorBody {
                    error: "Session not found".to_string(),
                    details: None,
                },
            ),
            SessionError::InvalidPayload(details) => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: self.context.to_string(),
                    details: Some(details.clone()),
                },
            ),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorBody {
                    error: self.context.to_string(),
                    details: Some(other.to_string()),
                },
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = self.parts();
        (status, Json(body)).into_response()
    }
}

/// `Json` whose rejections use the same `{error, details}` body as other failures.
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorBody>);

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err((
                rejection.status(),
                Json(ErrorBody {
                    error: "Invalid request body".to_string(),
                    details: Some(rejection.body_text()),
                }),
            )),
        }
    }
}

async fn start_session(State(state): State<AppState>) -> Json<StartedSession> {
    Json(state.controller.start().await)
}

async fn continue_session(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<ContinueRequest>,
) -> Result<Json<ContinueResponse>, ApiError> {
    let story = state
        .controller
        .advance(&request.session_id, &request.choice, request.choice_index)
        .await
        .map_err(ApiError::new("Failed to generate story"))?;
    Ok(Json(ContinueResponse { story }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let record = state
        .controller
        .snapshot(&session_id)
        .await
        .map_err(ApiError::new("Failed to load session"))?;
    Ok(Json(SessionView::from_record(session_id, record)))
}

async fn restore_session(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<RestoreRequest>,
) -> Result<Json<RestoreResponse>, ApiError> {
    let story = state
        .controller
        .restore(&request.session_id, request.session_data)
        .await
        .map_err(ApiError::new("Failed to restore session"))?;
    Ok(Json(RestoreResponse {
        success: true,
        story,
    }))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.controller.store().len().await;
    (StatusCode::OK, Json(json!({"status": "ok", "sessions": sessions})))
}
