use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use strum::Display;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::PaymentStatusReport,
    models::{AgentStatus, AttemptStatus, PaymentAttempt, PaymentMethod, PaymentPath},
    otp,
    store::OrderStore,
};

/// Where a piece of payment evidence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum EvidenceSource {
    Webhook,
    Poll,
}

/// Normalized payment evidence. Webhook payloads and poll responses both
/// reduce to this shape before reaching `reconcile`.
#[derive(Debug, Clone)]
pub struct PaymentEvidence {
    pub order_slug: Option<String>,
    pub paid: bool,
    pub raw_status: String,
    pub transaction_id: Option<String>,
    pub amount: Option<Decimal>,
    pub source: EvidenceSource,
}

impl PaymentEvidence {
    pub fn from_status_report(order_slug: &str, report: &PaymentStatusReport) -> Self {
        Self {
            order_slug: Some(order_slug.to_string()),
            paid: report.is_paid,
            raw_status: report.raw_status.clone(),
            transaction_id: report.transaction_id.clone(),
            amount: report.amount,
            source: EvidenceSource::Poll,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The order was already paid; nothing changed.
    AlreadyPaid,
    /// The evidence does not claim payment; nothing changed.
    StillPending,
    /// This call flipped `is_paid` false→true.
    MarkedPaid { otp_issued: bool },
}

/// Owns the decision of "is this order now paid". Both producers (webhook
/// handler and poll loop) serialize through the per-order lock inside the
/// store, so at most one call can flip `is_paid`.
pub struct ReconciliationService {
    store: Arc<OrderStore>,
    events: Option<Arc<EventSender>>,
    otp_ttl_secs: u64,
}

impl ReconciliationService {
    pub fn new(store: Arc<OrderStore>, events: Option<Arc<EventSender>>, otp_ttl_secs: u64) -> Self {
        Self {
            store,
            events,
            otp_ttl_secs,
        }
    }

    /// Applies payment evidence to an order. Idempotent: evidence for an
    /// already-paid order is acknowledged without mutation, and a thrown error
    /// leaves `is_paid` untouched.
    #[instrument(skip(self, evidence), fields(order_id = %order_id, source = %evidence.source))]
    pub async fn reconcile(
        &self,
        order_id: Uuid,
        evidence: PaymentEvidence,
    ) -> Result<ReconcileOutcome, ServiceError> {
        let otp_ttl = self.otp_ttl_secs;
        let outcome = self
            .store
            .with_order(order_id, |order| {
                if order.is_paid {
                    return Ok(ReconcileOutcome::AlreadyPaid);
                }
                if !evidence.paid {
                    return Ok(ReconcileOutcome::StillPending);
                }
                // Doorstep rule: COD money moves only once the agent is with the buyer.
                if order.payment_method == PaymentMethod::Cod
                    && order.agent_status != AgentStatus::LocationReached
                {
                    return Err(ServiceError::InvalidTransition(format!(
                        "COD order {} cannot be reconciled while {}",
                        order.order_number, order.agent_status
                    )));
                }
                if let Some(claimed) = evidence.amount {
                    if claimed != order.total_amount {
                        warn!(
                            order_id = %order.id,
                            %claimed,
                            expected = %order.total_amount,
                            "payment evidence amount differs from order total"
                        );
                    }
                }

                let now = Utc::now();
                order.is_paid = true;
                order.paid_at = Some(now);

                match order
                    .pending_attempt_mut()
                    .filter(|a| evidence.order_slug.is_none() || a.order_slug == evidence.order_slug)
                {
                    Some(attempt) => {
                        attempt.status = AttemptStatus::Completed;
                        attempt.completed_at = Some(now);
                        attempt.transaction_id = evidence.transaction_id.clone();
                    }
                    None => {
                        let gateway = order
                            .payment_gateway
                            .clone()
                            .unwrap_or_else(|| "gateway".to_string());
                        order.payment_attempts.push(PaymentAttempt {
                            gateway,
                            order_slug: evidence.order_slug.clone(),
                            amount: evidence.amount.unwrap_or(order.total_amount),
                            status: AttemptStatus::Completed,
                            ref_id: None,
                            transaction_id: evidence.transaction_id.clone(),
                            created_at: now,
                            completed_at: Some(now),
                        });
                    }
                }
                order.record_history(
                    &evidence.source.to_string(),
                    Some(format!("payment confirmed via {}", evidence.source)),
                );

                // The buyer is only asked for an OTP once money has moved.
                let mut otp_issued = false;
                if order.agent_status == AgentStatus::LocationReached
                    && matches!(order.payment_path, Some(PaymentPath::CodQr { .. }))
                    && !order.delivery.is_completed
                {
                    otp::issue(&mut order.delivery, otp_ttl);
                    otp_issued = true;
                }
                Ok(ReconcileOutcome::MarkedPaid { otp_issued })
            })
            .await?;

        if let ReconcileOutcome::MarkedPaid { otp_issued } = outcome {
            self.emit(Event::PaymentReconciled {
                order_id,
                source: evidence.source.to_string(),
                transaction_id: evidence.transaction_id.clone(),
            })
            .await;
            if otp_issued {
                if let Ok(order) = self.store.get(order_id).await {
                    if let Some(expires_at) = order.delivery.otp_expires_at {
                        self.emit(Event::OtpIssued {
                            order_id,
                            expires_at,
                        })
                        .await;
                    }
                }
            }
        }
        Ok(outcome)
    }

    async fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            if let Err(e) = events.send(event).await {
                warn!(error = %e, "failed to send reconciliation event");
            }
        }
    }
}
