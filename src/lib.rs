pub mod config;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod models;
pub mod otp;
pub mod services;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    config::AppConfig,
    errors::ServiceError,
    events::EventSender,
    gateway::{
        auth::GatewayAuthCache,
        client::{HttpGatewayClient, HttpTokenSource},
        GatewayApi,
    },
    services::{
        fulfillment::FulfillmentService, polling::PollingSupervisor,
        reconciliation::ReconciliationService,
    },
    store::OrderStore,
};

/// Standard response envelope.
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: Some(message.into()),
            errors: None,
        }
    }
}

/// Shared application state handed to every handler.
pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<OrderStore>,
    pub fulfillment: Arc<FulfillmentService>,
    pub reconciler: Arc<ReconciliationService>,
    pub poller: Arc<PollingSupervisor>,
    pub event_sender: Option<Arc<EventSender>>,
}

impl AppState {
    /// Wires the service graph over an arbitrary gateway implementation.
    /// Tests hand in fakes; `build_http` is the production path.
    pub fn build(
        config: AppConfig,
        gateway: Arc<dyn GatewayApi>,
        event_sender: Option<Arc<EventSender>>,
    ) -> Arc<Self> {
        let store = Arc::new(OrderStore::new());
        let reconciler = Arc::new(ReconciliationService::new(
            store.clone(),
            event_sender.clone(),
            config.otp_ttl_secs,
        ));
        let poller = Arc::new(PollingSupervisor::new(
            gateway.clone(),
            reconciler.clone(),
            store.clone(),
            event_sender.clone(),
            config.polling.clone(),
        ));
        let fulfillment = Arc::new(FulfillmentService::new(
            store.clone(),
            gateway,
            poller.clone(),
            event_sender.clone(),
            config.otp_ttl_secs,
        ));
        Arc::new(Self {
            config,
            store,
            fulfillment,
            reconciler,
            poller,
            event_sender,
        })
    }

    /// Builds the state over the real HTTP gateway client.
    pub fn build_http(
        config: AppConfig,
        event_sender: Option<Arc<EventSender>>,
    ) -> Result<Arc<Self>, ServiceError> {
        let token_source = Arc::new(HttpTokenSource::new(config.gateway.clone())?);
        let auth = Arc::new(GatewayAuthCache::new(
            token_source,
            Duration::from_secs(config.gateway.token_lifetime_secs),
            Duration::from_secs(config.gateway.token_safety_margin_secs),
        ));
        let gateway: Arc<dyn GatewayApi> =
            Arc::new(HttpGatewayClient::new(config.gateway.clone(), auth)?);
        Ok(Self::build(config, gateway, event_sender))
    }
}

/// Assembles the full router with tracing and CORS applied.
pub fn app_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(handlers::routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
