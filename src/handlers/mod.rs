use std::sync::Arc;

use axum::{
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::json;

use crate::AppState;

pub mod fulfillment;
pub mod webhooks;

/// Liveness probe. The service has no external dependencies to gate
/// readiness on; the gateway is reached lazily per request.
async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "up",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/orders", post(fulfillment::create_order))
        .route("/api/v1/orders/:id", get(fulfillment::get_order))
        .route("/api/v1/orders/:id/assign", post(fulfillment::assign))
        .route("/api/v1/orders/:id/accept", post(fulfillment::accept))
        .route(
            "/api/v1/orders/:id/reach-seller",
            post(fulfillment::reach_seller_location),
        )
        .route(
            "/api/v1/orders/:id/confirm-pickup",
            post(fulfillment::confirm_pickup),
        )
        .route(
            "/api/v1/orders/:id/reach-buyer",
            post(fulfillment::reach_buyer_location),
        )
        .route(
            "/api/v1/orders/:id/collect-cod",
            post(fulfillment::begin_cod_collection),
        )
        .route("/api/v1/orders/:id/resend-otp", post(fulfillment::resend_otp))
        .route(
            "/api/v1/orders/:id/complete",
            post(fulfillment::complete_delivery),
        )
        .route("/api/v1/webhooks/payment", post(webhooks::payment_webhook))
}
