use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use dispatch_api::{
    app_router,
    config::AppConfig,
    errors::ServiceError,
    gateway::{
        CreatedGatewayOrder, GatewayApi, GatewayCustomer, PaymentStatusReport, QrSession,
    },
    AppState,
};

/// Gateway fake shared between the test and the application. Flipping `paid`
/// makes subsequent status checks report a settled payment.
pub struct FakeGateway {
    pub paid: AtomicBool,
    pub status_calls: AtomicU32,
    pub unreachable: AtomicBool,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            paid: AtomicBool::new(false),
            status_calls: AtomicU32::new(0),
            unreachable: AtomicBool::new(false),
        })
    }

    pub fn mark_paid(&self) {
        self.paid.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl GatewayApi for FakeGateway {
    fn name(&self) -> &str {
        "qrpay"
    }

    async fn create_order(
        &self,
        _order_id: Uuid,
        order_number: &str,
        _amount: Decimal,
        _customer: &GatewayCustomer,
    ) -> Result<CreatedGatewayOrder, ServiceError> {
        Ok(CreatedGatewayOrder {
            order_slug: format!("slug-{}", order_number.to_lowercase()),
            qr: None,
        })
    }

    async fn generate_qr(&self, order_slug: &str) -> Result<QrSession, ServiceError> {
        Ok(QrSession {
            qr_image: "base64-qr-bytes".to_string(),
            payment_id: format!("pay-{}", order_slug),
        })
    }

    async fn check_status(&self, _order_slug: &str) -> Result<PaymentStatusReport, ServiceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ServiceError::GatewayUnreachable(
                "connection refused".to_string(),
            ));
        }
        let paid = self.paid.load(Ordering::SeqCst);
        Ok(PaymentStatusReport {
            is_paid: paid,
            raw_status: if paid { "success" } else { "pending" }.to_string(),
            transaction_id: paid.then(|| "txn-fake".to_string()),
            amount: None,
        })
    }
}

pub struct TestApp {
    router: Router,
    pub state: Arc<AppState>,
    pub gateway: Arc<FakeGateway>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let gateway = FakeGateway::new();
        let state = AppState::build(config, gateway.clone(), None);
        let router = app_router(state.clone());
        Self {
            router,
            state,
            gateway,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("serialize request body"))
        } else {
            Body::empty()
        };
        let request = builder.body(body).expect("build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response is json")
        };
        (status, value)
    }

    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.request(Method::POST, uri, Some(body)).await
    }

    /// Posts a raw body with extra headers; used by the webhook tests.
    pub async fn post_raw(
        &self,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body)).expect("build request");
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router error");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read response body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("response is json")
        };
        (status, value)
    }

    /// Creates an order and returns its id.
    pub async fn create_order(&self, order_number: &str, payment_method: &str) -> Uuid {
        let (status, body) = self
            .post(
                "/api/v1/orders",
                json!({
                    "order_number": order_number,
                    "total_amount": "499.00",
                    "payment_method": payment_method,
                    "customer": { "name": "Asha", "phone": "9999900000" }
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
        parse_order_id(&body)
    }

    /// Drives an order through assign, accept, seller arrival, pickup and
    /// buyer arrival, returning the acting agent.
    pub async fn drive_to_doorstep(&self, order_id: Uuid, order_number: &str) -> Uuid {
        let agent_id = Uuid::new_v4();
        let agent = json!({ "agent_id": agent_id });
        for step in ["assign", "accept", "reach-seller"] {
            let (status, body) = self
                .post(&format!("/api/v1/orders/{order_id}/{step}"), agent.clone())
                .await;
            assert_eq!(status, StatusCode::OK, "{step} failed: {body}");
        }
        let (status, body) = self
            .post(
                &format!("/api/v1/orders/{order_id}/confirm-pickup"),
                json!({ "agent_id": agent_id, "verified_order_id": order_number }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "confirm-pickup failed: {body}");
        let (status, body) = self
            .post(&format!("/api/v1/orders/{order_id}/reach-buyer"), agent)
            .await;
        assert_eq!(status, StatusCode::OK, "reach-buyer failed: {body}");
        agent_id
    }

    /// Reads the raw OTP from the store; the HTTP projection never carries it.
    pub async fn current_otp(&self, order_id: Uuid) -> String {
        self.state
            .store
            .get(order_id)
            .await
            .expect("order exists")
            .delivery
            .otp
            .expect("otp issued")
    }
}

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.environment = "test".to_string();
    config.polling.interval_ms = 100;
    config.polling.max_attempts = 10;
    config.polling.max_transport_errors = 3;
    config
}

pub fn parse_order_id(body: &Value) -> Uuid {
    body["data"]["id"]
        .as_str()
        .and_then(|s| Uuid::parse_str(s).ok())
        .expect("order id in response")
}
