use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

/// Events emitted by the fulfillment workflow. Consumers are decoupled from
/// the services; notification delivery mechanics live elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderAssigned {
        order_id: Uuid,
        agent_id: Uuid,
    },
    OrderAccepted {
        order_id: Uuid,
        agent_id: Uuid,
    },
    SellerLocationReached(Uuid),
    PickupCompleted(Uuid),
    BuyerLocationReached(Uuid),
    OtpIssued {
        order_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    CodCollectionStarted {
        order_id: Uuid,
        method: String,
    },
    PaymentReconciled {
        order_id: Uuid,
        source: String,
        transaction_id: Option<String>,
    },
    PaymentPollTimedOut(Uuid),
    DeliveryCompleted(Uuid),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }
}

/// Background consumer for workflow events. Logs each event; downstream
/// integrations subscribe here.
pub async fn process_events(mut receiver: mpsc::Receiver<Event>) {
    while let Some(event) = receiver.recv().await {
        info!(event = ?event, "workflow event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_delivers_to_receiver() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let order_id = Uuid::new_v4();
        sender.send(Event::OrderCreated(order_id)).await.unwrap();
        match rx.recv().await {
            Some(Event::OrderCreated(id)) => assert_eq!(id, order_id),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
