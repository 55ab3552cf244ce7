use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::dispatch::Dispatcher;
use crate::document::{DocumentEvent, DocumentPath, Fields};
use crate::error::{DispatchError, StoreError};

// -----------------------------------------------------------------------------
// Request / error types
// -----------------------------------------------------------------------------

/// A creation event delivered by the hosting platform.
#[derive(Debug, Deserialize)]
pub struct DeliveredEvent {
    pub path: String,
    #[serde(default)]
    pub data: Fields,
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Dispatch(DispatchError),
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        ApiError::Dispatch(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Dispatch(DispatchError::Store(
                StoreError::Database(_) | StoreError::Io(_),
            )) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Document store unavailable".to_string(),
            ),
            ApiError::Dispatch(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}

// -----------------------------------------------------------------------------
// Router
// -----------------------------------------------------------------------------

pub struct ApiState {
    pub dispatcher: Dispatcher,
}

pub fn router(dispatcher: Dispatcher) -> Router {
    let state = Arc::new(ApiState { dispatcher });

    Router::new()
        .route("/events", post(events_handler))
        .route("/healthz", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn events_handler(
    State(state): State<Arc<ApiState>>,
    Json(delivered): Json<DeliveredEvent>,
) -> Result<Response, ApiError> {
    let path = DocumentPath::parse(&delivered.path)
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let event = DocumentEvent::new(path, delivered.data);

    match state.dispatcher.handle(&event).await {
        Ok(Some(report)) => Ok((StatusCode::OK, Json(report)).into_response()),
        Ok(None) => {
            info!(path = %event.path, "Delivered event matches no rule");
            Ok((
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "rule": null })),
            )
                .into_response())
        }
        Err(e) => {
            error!(path = %event.path, "Invocation failed: {}", e);
            Err(e.into())
        }
    }
}
