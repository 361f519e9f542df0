use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::ServiceError;

pub mod auth;
pub mod client;

/// Buyer details the gateway wants attached to a collect request.
#[derive(Debug, Clone)]
pub struct GatewayCustomer {
    pub name: String,
    pub phone: String,
}

/// QR collect session handed to the agent's device.
#[derive(Debug, Clone, serde::Serialize)]
pub struct QrSession {
    pub qr_image: String,
    pub payment_id: String,
}

/// Result of creating a collect order. Some deployments bundle the QR code
/// into order creation instead of exposing a separate call.
#[derive(Debug, Clone)]
pub struct CreatedGatewayOrder {
    pub order_slug: String,
    pub qr: Option<QrSession>,
}

/// Normalized view of a gateway payment-status response.
#[derive(Debug, Clone)]
pub struct PaymentStatusReport {
    pub is_paid: bool,
    pub raw_status: String,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
}

/// Typed operations against the payment gateway. The HTTP implementation
/// lives in [`client`]; tests substitute scripted fakes.
#[async_trait]
pub trait GatewayApi: Send + Sync {
    /// Label recorded on orders and payment attempts.
    fn name(&self) -> &str {
        "gateway"
    }

    async fn create_order(
        &self,
        order_id: Uuid,
        order_number: &str,
        amount: Decimal,
        customer: &GatewayCustomer,
    ) -> Result<CreatedGatewayOrder, ServiceError>;

    async fn generate_qr(&self, order_slug: &str) -> Result<QrSession, ServiceError>;

    async fn check_status(&self, order_slug: &str) -> Result<PaymentStatusReport, ServiceError>;
}
