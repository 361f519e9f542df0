use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Checkpoint progression for the delivery agent. The declaration order is the
/// only legal sequence; transitions may not skip a state or go backward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentStatus {
    Unassigned,
    Assigned,
    Accepted,
    PickupCompleted,
    LocationReached,
    DeliveryCompleted,
}

impl AgentStatus {
    /// The single state this one may advance to, if any.
    pub fn successor(self) -> Option<AgentStatus> {
        match self {
            Self::Unassigned => Some(Self::Assigned),
            Self::Assigned => Some(Self::Accepted),
            Self::Accepted => Some(Self::PickupCompleted),
            Self::PickupCompleted => Some(Self::LocationReached),
            Self::LocationReached => Some(Self::DeliveryCompleted),
            Self::DeliveryCompleted => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Prepaid,
    Cod,
}

/// How payment is (or will be) collected. A tagged variant instead of boolean
/// flags so illegal combinations cannot be represented.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PaymentPath {
    Prepaid,
    CodCash,
    CodQr {
        order_slug: String,
        payment_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Completed,
    Expired,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentAttempt {
    pub gateway: String,
    pub order_slug: Option<String>,
    pub amount: Decimal,
    pub status: AttemptStatus,
    pub ref_id: Option<String>,
    pub transaction_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusHistoryEntry {
    pub status: String,
    pub changed_by: String,
    pub changed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PickupLeg {
    pub seller_location_reached_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub verified_order_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeliveryLeg {
    pub location_reached_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub otp: Option<String>,
    pub otp_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerInfo {
    pub name: String,
    pub phone: String,
}

/// The order aggregate. Created at checkout, mutated by agent actions and
/// payment events, never deleted. The audit trail lives inside the aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub total_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub customer: CustomerInfo,

    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_gateway: Option<String>,
    pub gateway_order_slug: Option<String>,
    pub payment_path: Option<PaymentPath>,

    pub agent_id: Option<Uuid>,
    pub agent_status: AgentStatus,

    pub pickup: PickupLeg,
    pub delivery: DeliveryLeg,

    pub payment_attempts: Vec<PaymentAttempt>,
    pub status_history: Vec<StatusHistoryEntry>,

    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        order_number: String,
        total_amount: Decimal,
        payment_method: PaymentMethod,
        customer: CustomerInfo,
    ) -> Self {
        let now = Utc::now();
        let mut order = Self {
            id: Uuid::new_v4(),
            order_number,
            total_amount,
            payment_method,
            customer,
            // Prepaid orders are settled at checkout, before fulfillment starts.
            is_paid: payment_method == PaymentMethod::Prepaid,
            paid_at: (payment_method == PaymentMethod::Prepaid).then_some(now),
            payment_gateway: None,
            gateway_order_slug: None,
            payment_path: (payment_method == PaymentMethod::Prepaid)
                .then_some(PaymentPath::Prepaid),
            agent_id: None,
            agent_status: AgentStatus::Unassigned,
            pickup: PickupLeg::default(),
            delivery: DeliveryLeg::default(),
            payment_attempts: Vec::new(),
            status_history: Vec::new(),
            version: 1,
            created_at: now,
            updated_at: Some(now),
        };
        order.record_history("system", Some("order created".to_string()));
        order
    }

    /// Appends an audit entry for the current agent status.
    pub fn record_history(&mut self, changed_by: &str, notes: Option<String>) {
        self.status_history.push(StatusHistoryEntry {
            status: self.agent_status.to_string(),
            changed_by: changed_by.to_string(),
            changed_at: Utc::now(),
            notes,
        });
    }

    /// Advances `agent_status` to `to`, rejecting skips and reversals.
    pub fn transition(
        &mut self,
        to: AgentStatus,
        changed_by: &str,
        notes: Option<String>,
    ) -> Result<(), ServiceError> {
        if self.agent_status.successor() != Some(to) {
            return Err(ServiceError::InvalidTransition(format!(
                "cannot move order {} from {} to {}",
                self.order_number, self.agent_status, to
            )));
        }
        self.agent_status = to;
        self.record_history(changed_by, notes);
        Ok(())
    }

    /// The most recent pending payment attempt, if one exists.
    pub fn pending_attempt_mut(&mut self) -> Option<&mut PaymentAttempt> {
        self.payment_attempts
            .iter_mut()
            .rev()
            .find(|a| a.status == AttemptStatus::Pending)
    }

    pub fn completed_attempts(&self) -> usize {
        self.payment_attempts
            .iter()
            .filter(|a| a.status == AttemptStatus::Completed)
            .count()
    }
}

/// Delivery leg as exposed to clients; the OTP value itself never leaves the
/// aggregate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryView {
    pub location_reached_at: Option<DateTime<Utc>>,
    pub is_completed: bool,
    pub otp_pending: bool,
    pub otp_expires_at: Option<DateTime<Utc>>,
}

/// Read-side view of the aggregate returned by every workflow operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderProjection {
    pub id: Uuid,
    pub order_number: String,
    pub total_amount: Decimal,
    pub payment_method: PaymentMethod,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub payment_gateway: Option<String>,
    pub gateway_order_slug: Option<String>,
    pub payment_path: Option<PaymentPath>,
    pub agent_id: Option<Uuid>,
    pub agent_status: AgentStatus,
    pub pickup: PickupLeg,
    pub delivery: DeliveryView,
    pub payment_attempts: Vec<PaymentAttempt>,
    pub status_history: Vec<StatusHistoryEntry>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<&Order> for OrderProjection {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number.clone(),
            total_amount: order.total_amount,
            payment_method: order.payment_method,
            is_paid: order.is_paid,
            paid_at: order.paid_at,
            payment_gateway: order.payment_gateway.clone(),
            gateway_order_slug: order.gateway_order_slug.clone(),
            payment_path: order.payment_path.clone(),
            agent_id: order.agent_id,
            agent_status: order.agent_status,
            pickup: order.pickup.clone(),
            delivery: DeliveryView {
                location_reached_at: order.delivery.location_reached_at,
                is_completed: order.delivery.is_completed,
                otp_pending: order.delivery.otp.is_some() && !order.delivery.is_completed,
                otp_expires_at: order.delivery.otp_expires_at,
            },
            payment_attempts: order.payment_attempts.clone(),
            status_history: order.status_history.clone(),
            version: order.version,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}
