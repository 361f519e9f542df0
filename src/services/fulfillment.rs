use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::{GatewayApi, GatewayCustomer, QrSession},
    models::{
        AgentStatus, AttemptStatus, CustomerInfo, Order, OrderProjection, PaymentAttempt,
        PaymentMethod, PaymentPath,
    },
    otp,
    services::polling::PollingSupervisor,
    store::OrderStore,
};

/// How the agent collects a COD payment at the doorstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CodMethod {
    Cash,
    Qr,
}

/// Returned by `begin_cod_collection`; carries the QR session when one was
/// opened.
#[derive(Debug, Serialize)]
pub struct CodCollection {
    pub order: OrderProjection,
    pub qr: Option<QrSession>,
}

pub struct NewOrder {
    pub order_number: String,
    pub total_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub customer: CustomerInfo,
}

/// The agent-side checkpoint state machine. Every operation loads the order
/// under its per-order lock, gates on the precondition for that checkpoint,
/// and appends to the audit trail.
pub struct FulfillmentService {
    store: Arc<OrderStore>,
    gateway: Arc<dyn GatewayApi>,
    poller: Arc<PollingSupervisor>,
    events: Option<Arc<EventSender>>,
    otp_ttl_secs: u64,
}

impl FulfillmentService {
    pub fn new(
        store: Arc<OrderStore>,
        gateway: Arc<dyn GatewayApi>,
        poller: Arc<PollingSupervisor>,
        events: Option<Arc<EventSender>>,
        otp_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            gateway,
            poller,
            events,
            otp_ttl_secs,
        }
    }

    /// Seeds a new order into the workflow. Prepaid orders arrive already
    /// settled from checkout.
    #[instrument(skip(self, new_order), fields(order_number = %new_order.order_number))]
    pub async fn create_order(&self, new_order: NewOrder) -> Result<OrderProjection, ServiceError> {
        if new_order.total_amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "order amount must be greater than zero".to_string(),
            ));
        }
        let order = Order::new(
            new_order.order_number,
            new_order.total_amount,
            new_order.payment_method,
            new_order.customer,
        );
        let projection = OrderProjection::from(&order);
        let order_id = self.store.insert(order)?;
        info!(%order_id, "order created");
        self.emit(Event::OrderCreated(order_id)).await;
        Ok(projection)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<OrderProjection, ServiceError> {
        let order = self.store.get(order_id).await?;
        Ok(OrderProjection::from(&order))
    }

    /// UNASSIGNED → ASSIGNED, recording the agent on the order.
    #[instrument(skip(self), fields(order_id = %order_id, agent_id = %agent_id))]
    pub async fn assign(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
    ) -> Result<OrderProjection, ServiceError> {
        let projection = self
            .store
            .with_order(order_id, |order| {
                order.transition(
                    AgentStatus::Assigned,
                    "system",
                    Some(format!("assigned to agent {}", agent_id)),
                )?;
                order.agent_id = Some(agent_id);
                Ok(OrderProjection::from(&*order))
            })
            .await?;
        self.emit(Event::OrderAssigned { order_id, agent_id }).await;
        Ok(projection)
    }

    /// ASSIGNED → ACCEPTED.
    #[instrument(skip(self), fields(order_id = %order_id, agent_id = %agent_id))]
    pub async fn accept(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
    ) -> Result<OrderProjection, ServiceError> {
        let projection = self
            .store
            .with_order(order_id, |order| {
                Self::ensure_acting_agent(order, agent_id)?;
                order.transition(AgentStatus::Accepted, &agent_id.to_string(), None)?;
                Ok(OrderProjection::from(&*order))
            })
            .await?;
        self.emit(Event::OrderAccepted { order_id, agent_id }).await;
        Ok(projection)
    }

    /// Records arrival at the seller. A sub-state of ACCEPTED, not a
    /// checkpoint of its own.
    #[instrument(skip(self), fields(order_id = %order_id, agent_id = %agent_id))]
    pub async fn reach_seller_location(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
    ) -> Result<OrderProjection, ServiceError> {
        let projection = self
            .store
            .with_order(order_id, |order| {
                Self::ensure_acting_agent(order, agent_id)?;
                if order.agent_status != AgentStatus::Accepted {
                    return Err(ServiceError::InvalidTransition(format!(
                        "cannot reach seller location while {}",
                        order.agent_status
                    )));
                }
                if order.pickup.seller_location_reached_at.is_some() {
                    return Err(ServiceError::InvalidTransition(
                        "seller location was already recorded".to_string(),
                    ));
                }
                order.pickup.seller_location_reached_at = Some(Utc::now());
                order.record_history(
                    &agent_id.to_string(),
                    Some("reached seller location".to_string()),
                );
                Ok(OrderProjection::from(&*order))
            })
            .await?;
        self.emit(Event::SellerLocationReached(order_id)).await;
        Ok(projection)
    }

    /// ACCEPTED → PICKUP_COMPLETED, gated on the seller-supplied order
    /// identifier. A mismatch fails without consuming the transition; the
    /// agent may retry.
    #[instrument(skip(self, verified_order_id), fields(order_id = %order_id, agent_id = %agent_id))]
    pub async fn confirm_pickup(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
        verified_order_id: &str,
    ) -> Result<OrderProjection, ServiceError> {
        let supplied = verified_order_id.trim().to_string();
        if supplied.is_empty() {
            return Err(ServiceError::ValidationError(
                "verified order id must not be empty".to_string(),
            ));
        }
        let projection = self
            .store
            .with_order(order_id, |order| {
                Self::ensure_acting_agent(order, agent_id)?;
                if order.agent_status != AgentStatus::Accepted
                    || order.pickup.seller_location_reached_at.is_none()
                {
                    return Err(ServiceError::InvalidTransition(
                        "pickup can only be confirmed after reaching the seller".to_string(),
                    ));
                }
                if !supplied.eq_ignore_ascii_case(order.order_number.trim()) {
                    warn!(order_id = %order.id, "pickup verification mismatch");
                    return Err(ServiceError::VerificationFailed(
                        "order identifier does not match, ask the seller again".to_string(),
                    ));
                }
                order.pickup.is_completed = true;
                order.pickup.verified_order_id = Some(supplied.clone());
                order.transition(
                    AgentStatus::PickupCompleted,
                    &agent_id.to_string(),
                    Some("pickup verified against seller order id".to_string()),
                )?;
                Ok(OrderProjection::from(&*order))
            })
            .await?;
        self.emit(Event::PickupCompleted(order_id)).await;
        Ok(projection)
    }

    /// PICKUP_COMPLETED → LOCATION_REACHED. Prepaid orders get their delivery
    /// OTP here; COD waits for the agent to choose a collection method.
    #[instrument(skip(self), fields(order_id = %order_id, agent_id = %agent_id))]
    pub async fn reach_buyer_location(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
    ) -> Result<OrderProjection, ServiceError> {
        let otp_ttl = self.otp_ttl_secs;
        let (projection, otp_expiry) = self
            .store
            .with_order(order_id, |order| {
                Self::ensure_acting_agent(order, agent_id)?;
                order.transition(
                    AgentStatus::LocationReached,
                    &agent_id.to_string(),
                    Some("reached buyer location".to_string()),
                )?;
                order.delivery.location_reached_at = Some(Utc::now());
                let mut otp_expiry = None;
                if order.payment_method == PaymentMethod::Prepaid {
                    otp_expiry = Some(otp::issue(&mut order.delivery, otp_ttl));
                }
                Ok((OrderProjection::from(&*order), otp_expiry))
            })
            .await?;
        self.emit(Event::BuyerLocationReached(order_id)).await;
        if let Some(expires_at) = otp_expiry {
            self.emit(Event::OtpIssued {
                order_id,
                expires_at,
            })
            .await;
        }
        Ok(projection)
    }

    /// Opens COD collection at the doorstep: either a pending-cash attempt, or
    /// a gateway QR session with a poll loop watching it.
    #[instrument(skip(self), fields(order_id = %order_id, agent_id = %agent_id, method = %method))]
    pub async fn begin_cod_collection(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
        method: CodMethod,
    ) -> Result<CodCollection, ServiceError> {
        // Validate preconditions on a snapshot before any gateway traffic.
        let snapshot = self.store.get(order_id).await?;
        Self::ensure_acting_agent(&snapshot, agent_id)?;
        Self::ensure_cod_collectible(&snapshot)?;

        match method {
            CodMethod::Cash => {
                let projection = self
                    .store
                    .with_order(order_id, |order| {
                        Self::ensure_cod_collectible(order)?;
                        order.payment_path = Some(PaymentPath::CodCash);
                        order.payment_attempts.push(PaymentAttempt {
                            gateway: "cash".to_string(),
                            order_slug: None,
                            amount: order.total_amount,
                            status: AttemptStatus::Pending,
                            ref_id: None,
                            transaction_id: None,
                            created_at: Utc::now(),
                            completed_at: None,
                        });
                        order.record_history(
                            &agent_id.to_string(),
                            Some("cash collection started".to_string()),
                        );
                        Ok(OrderProjection::from(&*order))
                    })
                    .await?;
                self.emit(Event::CodCollectionStarted {
                    order_id,
                    method: method.to_string(),
                })
                .await;
                Ok(CodCollection {
                    order: projection,
                    qr: None,
                })
            }
            CodMethod::Qr => {
                let customer = GatewayCustomer {
                    name: snapshot.customer.name.clone(),
                    phone: snapshot.customer.phone.clone(),
                };
                let created = self
                    .gateway
                    .create_order(
                        order_id,
                        &snapshot.order_number,
                        snapshot.total_amount,
                        &customer,
                    )
                    .await?;
                // Some deployments bundle the QR into order creation.
                let qr = match created.qr {
                    Some(qr) => qr,
                    None => self.gateway.generate_qr(&created.order_slug).await?,
                };

                let gateway_name = self.gateway.name().to_string();
                let slug = created.order_slug.clone();
                let payment_id = qr.payment_id.clone();
                let projection = self
                    .store
                    .with_order(order_id, |order| {
                        // Re-check: the order may have moved while the gateway
                        // round-trip was in flight.
                        Self::ensure_cod_collectible(order)?;
                        order.payment_path = Some(PaymentPath::CodQr {
                            order_slug: slug.clone(),
                            payment_id: payment_id.clone(),
                        });
                        order.payment_gateway = Some(gateway_name.clone());
                        order.gateway_order_slug = Some(slug.clone());
                        order.payment_attempts.push(PaymentAttempt {
                            gateway: gateway_name.clone(),
                            order_slug: Some(slug.clone()),
                            amount: order.total_amount,
                            status: AttemptStatus::Pending,
                            ref_id: Some(payment_id.clone()),
                            transaction_id: None,
                            created_at: Utc::now(),
                            completed_at: None,
                        });
                        order.record_history(
                            &agent_id.to_string(),
                            Some("QR collection started".to_string()),
                        );
                        Ok(OrderProjection::from(&*order))
                    })
                    .await?;

                self.store.index_slug(&created.order_slug, order_id);
                self.poller.start(order_id, created.order_slug);
                self.emit(Event::CodCollectionStarted {
                    order_id,
                    method: method.to_string(),
                })
                .await;
                Ok(CodCollection {
                    order: projection,
                    qr: Some(qr),
                })
            }
        }
    }

    /// Regenerates the delivery OTP with a fresh TTL.
    #[instrument(skip(self), fields(order_id = %order_id, agent_id = %agent_id))]
    pub async fn resend_otp(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
    ) -> Result<OrderProjection, ServiceError> {
        let otp_ttl = self.otp_ttl_secs;
        let (projection, expires_at) = self
            .store
            .with_order(order_id, |order| {
                Self::ensure_acting_agent(order, agent_id)?;
                if order.agent_status != AgentStatus::LocationReached {
                    return Err(ServiceError::InvalidTransition(format!(
                        "OTP can only be resent at the buyer location, order is {}",
                        order.agent_status
                    )));
                }
                let otp_flow_active = matches!(order.payment_path, Some(PaymentPath::Prepaid))
                    || (matches!(order.payment_path, Some(PaymentPath::CodQr { .. }))
                        && order.is_paid);
                if !otp_flow_active {
                    return Err(ServiceError::InvalidTransition(
                        "no OTP flow is active for this order".to_string(),
                    ));
                }
                let expires_at = otp::issue(&mut order.delivery, otp_ttl);
                order.record_history(&agent_id.to_string(), Some("OTP re-issued".to_string()));
                Ok((OrderProjection::from(&*order), expires_at))
            })
            .await?;
        self.emit(Event::OtpIssued {
            order_id,
            expires_at,
        })
        .await;
        Ok(projection)
    }

    /// LOCATION_REACHED → DELIVERY_COMPLETED. PREPAID and COD-QR require a
    /// valid OTP; COD-cash requires the collected acknowledgement and
    /// finalizes `is_paid` if reconciliation has not already.
    #[instrument(skip(self, otp_code), fields(order_id = %order_id, agent_id = %agent_id))]
    pub async fn complete_delivery(
        &self,
        order_id: Uuid,
        agent_id: Uuid,
        otp_code: Option<&str>,
        cod_ack: bool,
    ) -> Result<OrderProjection, ServiceError> {
        let projection = self
            .store
            .with_order(order_id, |order| {
                Self::ensure_acting_agent(order, agent_id)?;
                if order.agent_status != AgentStatus::LocationReached {
                    return Err(ServiceError::InvalidTransition(format!(
                        "delivery cannot be completed while {}",
                        order.agent_status
                    )));
                }

                match &order.payment_path {
                    Some(PaymentPath::Prepaid) => {
                        let code = otp_code.ok_or_else(|| {
                            ServiceError::ValidationError("otp is required".to_string())
                        })?;
                        otp::verify(&order.delivery, code, Utc::now())?;
                    }
                    Some(PaymentPath::CodQr { .. }) => {
                        if !order.is_paid {
                            return Err(ServiceError::InvalidTransition(
                                "QR payment has not been confirmed yet, try again".to_string(),
                            ));
                        }
                        let code = otp_code.ok_or_else(|| {
                            ServiceError::ValidationError("otp is required".to_string())
                        })?;
                        otp::verify(&order.delivery, code, Utc::now())?;
                    }
                    Some(PaymentPath::CodCash) => {
                        if !cod_ack {
                            return Err(ServiceError::ValidationError(
                                "cash collection must be acknowledged".to_string(),
                            ));
                        }
                        if !order.is_paid {
                            let now = Utc::now();
                            order.is_paid = true;
                            order.paid_at = Some(now);
                            if let Some(attempt) = order.pending_attempt_mut() {
                                attempt.status = AttemptStatus::Completed;
                                attempt.completed_at = Some(now);
                            }
                        }
                    }
                    None => {
                        return Err(ServiceError::InvalidTransition(
                            "payment collection has not been started".to_string(),
                        ));
                    }
                }

                order.delivery.is_completed = true;
                order.delivery.otp = None;
                order.transition(
                    AgentStatus::DeliveryCompleted,
                    &agent_id.to_string(),
                    Some("delivery completed".to_string()),
                )?;
                Ok(OrderProjection::from(&*order))
            })
            .await?;

        // A poll loop must not outlive delivery completion.
        self.poller.cancel(order_id);
        self.emit(Event::DeliveryCompleted(order_id)).await;
        Ok(projection)
    }

    fn ensure_acting_agent(order: &Order, agent_id: Uuid) -> Result<(), ServiceError> {
        match order.agent_id {
            Some(assigned) if assigned == agent_id => Ok(()),
            Some(_) => Err(ServiceError::ValidationError(
                "order is not assigned to this agent".to_string(),
            )),
            None => Err(ServiceError::InvalidTransition(
                "order has no assigned agent".to_string(),
            )),
        }
    }

    fn ensure_cod_collectible(order: &Order) -> Result<(), ServiceError> {
        if order.payment_method != PaymentMethod::Cod {
            return Err(ServiceError::InvalidTransition(
                "payment collection applies to COD orders only".to_string(),
            ));
        }
        if order.agent_status != AgentStatus::LocationReached {
            return Err(ServiceError::InvalidTransition(format!(
                "payment is collected at the doorstep, order is {}",
                order.agent_status
            )));
        }
        if order.is_paid {
            return Err(ServiceError::InvalidTransition(
                "order is already paid".to_string(),
            ));
        }
        Ok(())
    }

    async fn emit(&self, event: Event) {
        if let Some(events) = &self.events {
            if let Err(e) = events.send(event).await {
                warn!(error = %e, "failed to send fulfillment event");
            }
        }
    }
}
