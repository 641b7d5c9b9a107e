//! Assistant HTTP Routes
//!
//! `POST /ai-assistant`, mounted under `/functions/v1`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::Value;

use crate::auth::JwtManager;
use crate::functions::{AssistantError, AssistantRequest, AssistantService};

/// Shared assistant state
pub struct AssistantState {
    pub jwt: JwtManager,
    pub service: AssistantService,
}

/// Assistant routes with shared state
pub fn assistant_routes(state: Arc<AssistantState>) -> Router {
    Router::new()
        .route("/ai-assistant", post(assistant_handler))
        .with_state(state)
}

fn error_response(err: &AssistantError) -> (StatusCode, Json<Value>) {
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.body()))
}

/// Assistant handler
///
/// The body is parsed by hand so malformed JSON is a 400 like any other
/// invalid request.
async fn assistant_handler(
    State(state): State<Arc<AssistantState>>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let user = match state.jwt.authenticate(&headers) {
        Ok(user) => user,
        Err(e) => return error_response(&AssistantError::from(e)),
    };

    let request: AssistantRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => return error_response(&AssistantError::InvalidRequest(e.to_string())),
    };

    match state.service.respond(&user, request).await {
        Ok(reply) => match serde_json::to_value(&reply) {
            Ok(json) => (StatusCode::OK, Json(json)),
            Err(e) => error_response(&AssistantError::Internal(e.to_string())),
        },
        Err(e) => error_response(&e),
    }
}
