//! Payment Webhook HTTP Routes
//!
//! `/payment-webhook/{gateway}`, mounted under `/functions/v1`. `GET` on
//! either path is a liveness probe for gateway dashboards.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use crate::functions::PaymentService;

/// Header carrying the Stripe signature
const STRIPE_SIGNATURE: &str = "stripe-signature";

/// Shared webhook state
pub struct WebhookState {
    pub service: PaymentService,
}

/// Webhook routes with shared state
pub fn webhook_routes(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/payment-webhook", get(liveness_handler))
        .route(
            "/payment-webhook/:gateway",
            get(liveness_handler).post(webhook_handler),
        )
        .with_state(state)
}

async fn liveness_handler() -> &'static str {
    "OK"
}

/// Webhook handler
async fn webhook_handler(
    State(state): State<Arc<WebhookState>>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = headers
        .get(STRIPE_SIGNATURE)
        .and_then(|v| v.to_str().ok());

    match state.service.handle(&gateway, signature, &body) {
        Ok(_) => (StatusCode::OK, "OK").into_response(),
        Err(e) => {
            let status = StatusCode::from_u16(e.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(e.body())).into_response()
        }
    }
}
