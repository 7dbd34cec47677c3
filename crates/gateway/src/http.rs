//! HTTP surface over the [`Dispatcher`].
//!
//! - `GET /health`
//! - `POST /v1/submit` `{"task", "session"?}` → `{"answer", "conversation_id"}`
//! - `GET /v1/tools`
//! - `GET /v1/conversations/{id}`
//! - `DELETE /v1/conversations/{id}`

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use taskloop_core::error::Error;
use taskloop_core::message::Message;
use taskloop_core::tool::ToolDescriptor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::dispatcher::{Dispatcher, LoopRequest, LoopResponse};

pub type SharedDispatcher = Arc<Dispatcher>;

/// Build the Axum router with all gateway routes.
pub fn router(dispatcher: SharedDispatcher) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/submit", post(submit_handler))
        .route("/v1/tools", get(list_tools_handler))
        .route(
            "/v1/conversations/{id}",
            get(get_conversation_handler).delete(delete_conversation_handler),
        )
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(dispatcher)
}

// --- Errors ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: String,
    pub message: String,
}

/// An error response with a stable `kind`.
pub struct ApiError {
    status: StatusCode,
    kind: String,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_request".into(),
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found".into(),
            message: message.into(),
        }
    }
}

/// HTTP status for a loop error.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Inference(_) | Error::Catalog(_) => StatusCode::BAD_GATEWAY,
        Error::MaxIterations { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Busy(_) => StatusCode::CONFLICT,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        Error::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
        Error::Protocol(_) | Error::Config { .. } | Error::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self {
            status: status_for(&err),
            kind: err.kind().into(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                kind: self.kind,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn submit_handler(
    State(dispatcher): State<SharedDispatcher>,
    Json(request): Json<LoopRequest>,
) -> Result<Json<LoopResponse>, ApiError> {
    if request.task.trim().is_empty() {
        return Err(ApiError::bad_request("task must not be empty"));
    }
    info!(task_len = request.task.len(), session = ?request.session, "v1/submit request");

    // A dropped handler (client gone) cancels the spawned cycle
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();
    let task = tokio::spawn(async move { dispatcher.submit(request, cancel).await });

    let outcome = task
        .await
        .map_err(|e| Error::Internal(format!("request task failed: {e}")))?;

    match outcome {
        Ok(response) => Ok(Json(response)),
        Err(e) => {
            error!(kind = e.kind(), error = %e, "Request failed");
            Err(e.into())
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDescriptor>,
    pub count: usize,
}

async fn list_tools_handler(
    State(dispatcher): State<SharedDispatcher>,
) -> Result<Json<ToolListResponse>, ApiError> {
    let tools = dispatcher.list_tools().await?;
    let count = tools.len();
    Ok(Json(ToolListResponse { tools, count }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConversationDetailResponse {
    pub id: String,
    pub messages: Vec<Message>,
    pub message_count: usize,
    pub created_at: String,
    pub updated_at: String,
}

async fn get_conversation_handler(
    State(dispatcher): State<SharedDispatcher>,
    Path(id): Path<String>,
) -> Result<Json<ConversationDetailResponse>, ApiError> {
    let store = dispatcher
        .history(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("no conversation '{id}'")))?;

    Ok(Json(ConversationDetailResponse {
        id: store.id().to_string(),
        message_count: store.len(),
        messages: store.messages().to_vec(),
        created_at: store.created_at().to_rfc3339(),
        updated_at: store.updated_at().to_rfc3339(),
    }))
}

async fn delete_conversation_handler(
    State(dispatcher): State<SharedDispatcher>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if dispatcher.reset(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!("no conversation '{id}'")))
    }
}
