use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Json},
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{info, instrument, warn};

use crate::{
    errors::ServiceError,
    gateway::client::{self, AMOUNT_FIELDS, SLUG_FIELDS, STATUS_FIELDS, TRANSACTION_FIELDS},
    services::reconciliation::{EvidenceSource, PaymentEvidence, ReconcileOutcome},
    AppState,
};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// What a webhook payload normalized to. Payloads the service cannot act on
/// are acknowledged so the gateway stops redelivering them.
#[derive(Debug)]
pub(crate) enum WebhookDisposition {
    Evidence {
        order_slug: String,
        evidence: PaymentEvidence,
    },
    Ignored(&'static str),
}

pub(crate) fn normalize_webhook(payload: &Value) -> WebhookDisposition {
    let order_slug = match client::extract_string(payload, SLUG_FIELDS) {
        Some(slug) => slug,
        None => return WebhookDisposition::Ignored("no order reference in payload"),
    };
    let raw_status = match client::extract_string(payload, STATUS_FIELDS) {
        Some(status) => status,
        None => return WebhookDisposition::Ignored("no payment status in payload"),
    };
    // Unknown status words are never treated as success.
    let paid = match client::classify_status(&raw_status) {
        Some(paid) => paid,
        None => return WebhookDisposition::Ignored("unrecognized payment status"),
    };
    let evidence = PaymentEvidence {
        order_slug: Some(order_slug.clone()),
        paid,
        raw_status,
        transaction_id: client::extract_string(payload, TRANSACTION_FIELDS),
        amount: client::extract_amount(payload, AMOUNT_FIELDS),
        source: EvidenceSource::Webhook,
    };
    WebhookDisposition::Evidence {
        order_slug,
        evidence,
    }
}

/// Best-effort signature check: the gateway does not guarantee signatures, so
/// an absent header never blocks processing. A header that is present must
/// verify against the configured secret.
fn verify_signature(headers: &HeaderMap, payload: &[u8], secret: &str) -> bool {
    let supplied = match headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok()) {
        Some(sig) => sig,
        None => return true,
    };
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, supplied)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// POST /api/v1/webhooks/payment
///
/// Push half of the dual evidence path. The payload is normalized with the
/// same field synonyms the poll client uses, then handed to reconciliation;
/// the poll loop is cancelled once the order is paid.
#[instrument(skip_all)]
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = &state.config.gateway.webhook_secret {
        if !verify_signature(&headers, &body, secret) {
            warn!("webhook signature verification failed");
            return Err(ServiceError::ValidationError(
                "invalid webhook signature".to_string(),
            ));
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::ValidationError(format!("invalid webhook body: {}", e)))?;

    let (order_slug, evidence) = match normalize_webhook(&payload) {
        WebhookDisposition::Evidence {
            order_slug,
            evidence,
        } => (order_slug, evidence),
        WebhookDisposition::Ignored(reason) => {
            warn!(reason, "webhook payload ignored");
            return Ok(Json(json!({ "success": true, "message": reason })));
        }
    };

    let order_id = match state.store.resolve_slug(&order_slug) {
        Some(id) => id,
        None => {
            warn!(%order_slug, "webhook for unknown order slug");
            return Ok(Json(json!({ "success": true, "message": "unknown order" })));
        }
    };

    let outcome = state.reconciler.reconcile(order_id, evidence).await?;
    if matches!(outcome, ReconcileOutcome::MarkedPaid { .. }) {
        state.poller.cancel(order_id);
        info!(%order_id, "payment settled via webhook");
    }
    Ok(Json(json!({ "success": true, "message": "processed" })))
}
