use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    config::PollingConfig,
    errors::ServiceError,
    events::{Event, EventSender},
    gateway::GatewayApi,
    models::AttemptStatus,
    services::reconciliation::{PaymentEvidence, ReconciliationService},
    store::OrderStore,
};

/// Terminal result of a poll session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Reconciliation observed the order paid (via this loop or elsewhere).
    Paid,
    /// The attempt cap elapsed without a paid status.
    TimedOut,
    /// The loop was cancelled or superseded.
    Cancelled,
    /// Too many consecutive transport failures.
    TransportGaveUp,
}

struct ActivePoll {
    cancel: watch::Sender<bool>,
    generation: u64,
}

/// Runs at most one bounded, cancellable payment-status poll loop per order,
/// forwarding definitive results to the reconciler. Starting a new loop for an
/// order cancels any prior one; cancellation is observed within one tick.
pub struct PollingSupervisor {
    gateway: Arc<dyn GatewayApi>,
    reconciler: Arc<ReconciliationService>,
    store: Arc<OrderStore>,
    events: Option<Arc<EventSender>>,
    settings: PollingConfig,
    active: DashMap<Uuid, ActivePoll>,
    generations: AtomicU64,
}

impl PollingSupervisor {
    pub fn new(
        gateway: Arc<dyn GatewayApi>,
        reconciler: Arc<ReconciliationService>,
        store: Arc<OrderStore>,
        events: Option<Arc<EventSender>>,
        settings: PollingConfig,
    ) -> Self {
        Self {
            gateway,
            reconciler,
            store,
            events,
            settings,
            active: DashMap::new(),
            generations: AtomicU64::new(0),
        }
    }

    /// Spawns a background poll loop for the order, cancelling any prior one.
    pub fn start(self: &Arc<Self>, order_id: Uuid, order_slug: String) {
        self.cancel(order_id);
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.active.insert(
            order_id,
            ActivePoll {
                cancel: cancel_tx,
                generation,
            },
        );

        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = supervisor.run_loop(order_id, &order_slug, cancel_rx).await;
            supervisor
                .active
                .remove_if(&order_id, |_, poll| poll.generation == generation);
            info!(%order_id, ?outcome, "payment poll loop finished");
        });
    }

    /// Cancels the active loop for the order, if any. Observed within one tick.
    pub fn cancel(&self, order_id: Uuid) {
        if let Some((_, poll)) = self.active.remove(&order_id) {
            let _ = poll.cancel.send(true);
        }
    }

    pub fn is_active(&self, order_id: Uuid) -> bool {
        self.active.contains_key(&order_id)
    }

    /// The poll loop body. Public so tests can drive it without spawning.
    #[instrument(skip(self, cancel), fields(order_id = %order_id))]
    pub async fn run_loop(
        &self,
        order_id: Uuid,
        order_slug: &str,
        mut cancel: watch::Receiver<bool>,
    ) -> PollOutcome {
        let interval = self.settings.interval();
        let mut transport_errors = 0u32;

        for _ in 0..self.settings.max_attempts {
            tokio::select! {
                changed = cancel.changed() => {
                    match changed {
                        Ok(()) if *cancel.borrow() => return PollOutcome::Cancelled,
                        Ok(()) => continue,
                        // Sender dropped: this loop was superseded.
                        Err(_) => return PollOutcome::Cancelled,
                    }
                }
                _ = tokio::time::sleep(interval) => {}
            }

            // A webhook may have settled the order between ticks.
            match self.store.get(order_id).await {
                Ok(order) if order.is_paid => return PollOutcome::Paid,
                Ok(_) => {}
                Err(_) => return PollOutcome::Cancelled,
            }

            match self.gateway.check_status(order_slug).await {
                Ok(report) => {
                    transport_errors = 0;
                    if report.is_paid {
                        let evidence = PaymentEvidence::from_status_report(order_slug, &report);
                        match self.reconciler.reconcile(order_id, evidence).await {
                            Ok(_) => return PollOutcome::Paid,
                            Err(err) => {
                                warn!(%order_id, error = %err, "reconciliation of poll evidence failed");
                            }
                        }
                    }
                }
                Err(
                    err @ (ServiceError::GatewayUnreachable(_) | ServiceError::AuthExpired),
                ) => {
                    transport_errors += 1;
                    warn!(%order_id, error = %err, transport_errors, "poll transport error");
                    if transport_errors >= self.settings.max_transport_errors {
                        self.mark_attempt(order_id, order_slug, AttemptStatus::Failed)
                            .await;
                        return PollOutcome::TransportGaveUp;
                    }
                }
                Err(err) => {
                    transport_errors += 1;
                    warn!(%order_id, error = %err, transport_errors, "poll status check rejected");
                    if transport_errors >= self.settings.max_transport_errors {
                        self.mark_attempt(order_id, order_slug, AttemptStatus::Failed)
                            .await;
                        return PollOutcome::TransportGaveUp;
                    }
                }
            }
        }

        self.mark_attempt(order_id, order_slug, AttemptStatus::Expired)
            .await;
        if let Some(events) = &self.events {
            if let Err(e) = events.send(Event::PaymentPollTimedOut(order_id)).await {
                warn!(error = %e, "failed to send poll timeout event");
            }
        }
        PollOutcome::TimedOut
    }

    async fn mark_attempt(&self, order_id: Uuid, order_slug: &str, status: AttemptStatus) {
        let slug = order_slug.to_string();
        let result = self
            .store
            .with_order(order_id, |order| {
                if let Some(attempt) = order
                    .pending_attempt_mut()
                    .filter(|a| a.order_slug.as_deref() == Some(slug.as_str()))
                {
                    attempt.status = status;
                }
                order.record_history(
                    "system",
                    Some(format!("payment status polling ended: {}", status)),
                );
                Ok(())
            })
            .await;
        if let Err(err) = result {
            warn!(%order_id, error = %err, "failed to record poll attempt outcome");
        }
    }
}
