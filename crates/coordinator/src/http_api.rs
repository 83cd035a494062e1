//! HTTP endpoint of the coordinator
//!
//! `POST /` carries one protocol envelope and answers with the reply list.
//! `GET /status` and `GET /api/health` expose coordinator state for operators.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use relay_core::{Error, ErrorResponse, FinalResult, Message, WorkerSnapshot};

use crate::middleware::RequestStats;
use crate::service::CoordinatorService;

/// Shared state for HTTP handlers (Arc for thread-safe sharing)
pub type AppState = Arc<CoordinatorService>;

/// Coordinator status for API response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub run_id: String,
    pub uptime: u64,
    pub done: bool,
    pub running_nodes: usize,
    pub final_result: Option<FinalResult>,
    pub workers: Vec<WorkerSnapshot>,
    pub requests: BTreeMap<String, RequestStats>,
}

/// Request-level failure mapped onto an HTTP status
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::ProtocolViolation { .. } | Error::Serialization(_) => StatusCode::BAD_REQUEST,
            Error::UnknownNode { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorResponse::from(&self.0))).into_response()
    }
}

/// Create the HTTP API router
pub fn create_router(service: Arc<CoordinatorService>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(handle_message))
        .route("/status", get(get_status))
        .route("/api/health", get(health_check))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

/// Protocol endpoint: one envelope in, a list of envelopes out
async fn handle_message(
    State(service): State<AppState>,
    body: Bytes,
) -> Result<Json<Vec<Message>>, ApiError> {
    let request = Message::decode(&body).map_err(|e| {
        service.metrics().record_error("malformed");
        warn!(error = %e, bytes = body.len(), "Malformed request envelope");
        e
    })?;
    let replies = service.handle(request)?;
    Ok(Json(replies))
}

/// Get coordinator status
async fn get_status(State(service): State<AppState>) -> impl IntoResponse {
    Json(service.status_for_api())
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({"status": "ok"})))
}
