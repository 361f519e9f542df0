use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    config::GatewayConfig,
    errors::ServiceError,
    gateway::{
        auth::{AuthToken, GatewayAuthCache, TokenSource},
        CreatedGatewayOrder, GatewayApi, GatewayCustomer, PaymentStatusReport, QrSession,
    },
};

/// Field synonyms observed across gateway deployments. The normalizer accepts
/// any of these; a payload matching none of them is a hard failure.
const TOKEN_FIELDS: &[&str] = &["access_token", "token", "data.access_token", "data.token"];
const EXPIRY_FIELDS: &[&str] = &["expires_in", "data.expires_in"];
pub(crate) const SLUG_FIELDS: &[&str] = &[
    "order_slug",
    "slug",
    "data.order_slug",
    "data.slug",
    "collect_request_id",
    "data.collect_request_id",
];
const QR_FIELDS: &[&str] = &["qr_image", "qr_code", "data.qr_image", "data.qr_code"];
const PAYMENT_ID_FIELDS: &[&str] = &[
    "payment_id",
    "ref_id",
    "data.payment_id",
    "data.ref_id",
];
pub(crate) const STATUS_FIELDS: &[&str] = &[
    "payment_status",
    "status",
    "data.payment_status",
    "data.status",
];
pub(crate) const TRANSACTION_FIELDS: &[&str] = &[
    "transaction_id",
    "txn_id",
    "data.transaction_id",
    "data.txn_id",
];
pub(crate) const AMOUNT_FIELDS: &[&str] = &["amount", "transaction_amount", "data.amount"];
const REASON_FIELDS: &[&str] = &["message", "error", "reason", "data.message"];

/// Walks the first dot-path in `paths` that resolves inside `value`.
pub(crate) fn lookup<'a>(value: &'a Value, paths: &[&str]) -> Option<&'a Value> {
    for path in paths {
        let mut current = value;
        let mut matched = true;
        for segment in path.split('.') {
            match current.get(segment) {
                Some(next) => current = next,
                None => {
                    matched = false;
                    break;
                }
            }
        }
        if matched && !current.is_null() {
            return Some(current);
        }
    }
    None
}

pub(crate) fn extract_string(value: &Value, paths: &[&str]) -> Option<String> {
    match lookup(value, paths)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn extract_u64(value: &Value, paths: &[&str]) -> Option<u64> {
    match lookup(value, paths)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn extract_amount(value: &Value, paths: &[&str]) -> Option<Decimal> {
    match lookup(value, paths)? {
        Value::String(s) => Decimal::from_str(s).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Maps a raw gateway status string to a paid/pending claim. `None` means the
/// status is unrecognized and must be treated as a hard failure, never as
/// success.
pub(crate) fn classify_status(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "success" | "successful" | "paid" | "captured" | "completed" | "settled"
        | "txn_success" => Some(true),
        "pending" | "initiated" | "created" | "processing" | "in_progress" | "unpaid"
        | "not_initiated" | "txn_pending" | "failed" | "failure" | "declined" | "expired"
        | "cancelled" | "txn_failed" => Some(false),
        _ => None,
    }
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    ServiceError::GatewayUnreachable(err.to_string())
}

fn rejection_reason(payload: &Value, status: StatusCode) -> String {
    extract_string(payload, REASON_FIELDS)
        .unwrap_or_else(|| format!("gateway answered {}", status))
}

/// Token acquisition against the gateway's `POST /auth` endpoint.
pub struct HttpTokenSource {
    http: reqwest::Client,
    cfg: GatewayConfig,
}

impl HttpTokenSource {
    pub fn new(cfg: GatewayConfig) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self { http, cfg })
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn authenticate(&self) -> Result<AuthToken, ServiceError> {
        let url = format!("{}/auth", self.cfg.base_url.trim_end_matches('/'));
        let response = self
            .http
            .post(&url)
            .json(&json!({
                "client_id": self.cfg.client_id,
                "client_secret": self.cfg.client_secret,
            }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let payload: Value = response.json().await.map_err(|e| {
            ServiceError::GatewayRejected(format!("auth response was not JSON: {}", e))
        })?;
        if !status.is_success() {
            return Err(ServiceError::GatewayRejected(rejection_reason(
                &payload, status,
            )));
        }

        let access_token = extract_string(&payload, TOKEN_FIELDS).ok_or_else(|| {
            ServiceError::GatewayRejected("auth response carried no recognizable token".to_string())
        })?;
        let expires_in = extract_u64(&payload, EXPIRY_FIELDS).map(std::time::Duration::from_secs);
        Ok(AuthToken {
            access_token,
            expires_in,
        })
    }
}

/// HTTP implementation of [`GatewayApi`]. Every call obtains a bearer token
/// from the auth cache; a 401 invalidates the cache and the call is retried
/// once with a fresh token before failing with `AuthExpired`.
pub struct HttpGatewayClient {
    http: reqwest::Client,
    cfg: GatewayConfig,
    auth: Arc<GatewayAuthCache>,
}

impl HttpGatewayClient {
    pub fn new(cfg: GatewayConfig, auth: Arc<GatewayAuthCache>) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;
        Ok(Self { http, cfg, auth })
    }

    async fn call(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ServiceError> {
        let url = format!("{}{}", self.cfg.base_url.trim_end_matches('/'), path);
        for attempt in 0..2 {
            let token = self.auth.token().await?;
            let mut request = self.http.request(method.clone(), &url).bearer_auth(&token);
            if let Some(body) = body {
                request = request.json(body);
            }
            let response = request.send().await.map_err(transport_error)?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                self.auth.invalidate();
                if attempt == 0 {
                    debug!(%url, "gateway answered 401, retrying once with a fresh token");
                    continue;
                }
                return Err(ServiceError::AuthExpired);
            }

            let payload: Value = response.json().await.map_err(|e| {
                ServiceError::GatewayRejected(format!("gateway response was not JSON: {}", e))
            })?;
            if !status.is_success() {
                return Err(ServiceError::GatewayRejected(rejection_reason(
                    &payload, status,
                )));
            }
            return Ok(payload);
        }
        Err(ServiceError::AuthExpired)
    }

    fn qr_from_payload(payload: &Value, fallback_payment_id: &str) -> Option<QrSession> {
        let qr_image = extract_string(payload, QR_FIELDS)?;
        let payment_id = extract_string(payload, PAYMENT_ID_FIELDS)
            .unwrap_or_else(|| fallback_payment_id.to_string());
        Some(QrSession {
            qr_image,
            payment_id,
        })
    }
}

#[async_trait]
impl GatewayApi for HttpGatewayClient {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    #[instrument(skip(self, customer), fields(order_id = %order_id))]
    async fn create_order(
        &self,
        order_id: Uuid,
        order_number: &str,
        amount: Decimal,
        customer: &GatewayCustomer,
    ) -> Result<CreatedGatewayOrder, ServiceError> {
        let body = json!({
            "order_id": order_id,
            "order_number": order_number,
            "amount": amount,
            "customer": {
                "name": customer.name,
                "phone": customer.phone,
            },
        });
        let payload = self.call(Method::POST, "/create-order", Some(&body)).await?;

        let order_slug = extract_string(&payload, SLUG_FIELDS).ok_or_else(|| {
            ServiceError::GatewayRejected(
                "order-creation response carried no recognizable order slug".to_string(),
            )
        })?;
        let qr = Self::qr_from_payload(&payload, &order_slug);
        Ok(CreatedGatewayOrder { order_slug, qr })
    }

    #[instrument(skip(self))]
    async fn generate_qr(&self, order_slug: &str) -> Result<QrSession, ServiceError> {
        let body = json!({ "order_slug": order_slug });
        let payload = self.call(Method::POST, "/generate-qr", Some(&body)).await?;

        Self::qr_from_payload(&payload, order_slug).ok_or_else(|| {
            ServiceError::GatewayRejected(
                "QR response carried no recognizable QR image".to_string(),
            )
        })
    }

    #[instrument(skip(self))]
    async fn check_status(&self, order_slug: &str) -> Result<PaymentStatusReport, ServiceError> {
        let path = format!("/payment-status/{}", order_slug);
        let payload = self.call(Method::GET, &path, None).await?;

        let raw_status = extract_string(&payload, STATUS_FIELDS).ok_or_else(|| {
            ServiceError::GatewayRejected(
                "status response carried no recognizable payment status".to_string(),
            )
        })?;
        let is_paid = classify_status(&raw_status).ok_or_else(|| {
            warn!(%raw_status, "unrecognized gateway payment status");
            ServiceError::GatewayRejected(format!(
                "unrecognized payment status '{}'",
                raw_status
            ))
        })?;

        Ok(PaymentStatusReport {
            is_paid,
            raw_status,
            transaction_id: extract_string(&payload, TRANSACTION_FIELDS),
            amount: extract_amount(&payload, AMOUNT_FIELDS),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn lookup_accepts_nested_and_flat_synonyms() {
        let flat = json!({ "order_slug": "abc123" });
        let nested = json!({ "data": { "slug": "abc123" } });
        let collect = json!({ "collect_request_id": "abc123" });
        for payload in [flat, nested, collect] {
            assert_eq!(
                extract_string(&payload, SLUG_FIELDS).as_deref(),
                Some("abc123")
            );
        }
    }

    #[test]
    fn missing_slug_is_none_not_default() {
        let payload = json!({ "data": { "something_else": "x" } });
        assert_eq!(extract_string(&payload, SLUG_FIELDS), None);
    }

    #[test]
    fn classify_status_covers_synonyms_and_rejects_unknowns() {
        assert_eq!(classify_status("SUCCESS"), Some(true));
        assert_eq!(classify_status("captured"), Some(true));
        assert_eq!(classify_status("txn_success"), Some(true));
        assert_eq!(classify_status("pending"), Some(false));
        assert_eq!(classify_status("failed"), Some(false));
        assert_eq!(classify_status("weird_new_state"), None);
    }

    #[test]
    fn amount_parses_from_string_and_number() {
        assert_eq!(
            extract_amount(&json!({ "amount": "499.00" }), AMOUNT_FIELDS),
            Some(dec!(499.00))
        );
        assert_eq!(
            extract_amount(&json!({ "amount": 499 }), AMOUNT_FIELDS),
            Some(dec!(499))
        );
        assert_eq!(
            extract_amount(&json!({ "data": { "amount": 12.5 } }), AMOUNT_FIELDS),
            Some(dec!(12.5))
        );
    }

    #[test]
    fn qr_session_falls_back_to_slug_for_payment_id() {
        let bundled = json!({ "order_slug": "s-1", "qr_image": "base64data" });
        let qr = HttpGatewayClient::qr_from_payload(&bundled, "s-1").unwrap();
        assert_eq!(qr.payment_id, "s-1");

        let explicit = json!({ "qr_code": "base64data", "payment_id": "p-9" });
        let qr = HttpGatewayClient::qr_from_payload(&explicit, "s-1").unwrap();
        assert_eq!(qr.payment_id, "p-9");

        assert!(HttpGatewayClient::qr_from_payload(&json!({}), "s-1").is_none());
    }
}
