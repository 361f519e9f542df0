use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{errors::ServiceError, models::Order};

/// Process-local order store. Each order sits behind its own async mutex so
/// state-mutating operations for the same order are serialized while distinct
/// orders proceed concurrently.
#[derive(Default)]
pub struct OrderStore {
    orders: DashMap<Uuid, Arc<Mutex<Order>>>,
    slug_index: DashMap<String, Uuid>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, order: Order) -> Result<Uuid, ServiceError> {
        let id = order.id;
        if self.orders.contains_key(&id) {
            return Err(ServiceError::Conflict(format!(
                "order {} already exists",
                id
            )));
        }
        self.orders.insert(id, Arc::new(Mutex::new(order)));
        Ok(id)
    }

    /// Snapshot of the current aggregate state.
    pub async fn get(&self, id: Uuid) -> Result<Order, ServiceError> {
        let cell = self.cell(id)?;
        let guard = cell.lock().await;
        Ok(guard.clone())
    }

    /// Maps a gateway order slug back to the order it belongs to.
    pub fn resolve_slug(&self, slug: &str) -> Option<Uuid> {
        self.slug_index.get(slug).map(|entry| *entry.value())
    }

    pub fn index_slug(&self, slug: &str, id: Uuid) {
        self.slug_index.insert(slug.to_string(), id);
    }

    /// Runs `mutate` against a draft copy of the order under its per-order
    /// lock. The draft only replaces the stored aggregate if `mutate` returns
    /// `Ok`, so a failing operation leaves the order untouched; on success the
    /// version counter is bumped.
    pub async fn with_order<T, F>(&self, id: Uuid, mutate: F) -> Result<T, ServiceError>
    where
        F: FnOnce(&mut Order) -> Result<T, ServiceError>,
    {
        let cell = self.cell(id)?;
        let mut guard = cell.lock().await;
        let mut draft = guard.clone();
        let out = mutate(&mut draft)?;
        draft.version = guard.version + 1;
        draft.updated_at = Some(Utc::now());
        *guard = draft;
        Ok(out)
    }

    fn cell(&self, id: Uuid) -> Result<Arc<Mutex<Order>>, ServiceError> {
        self.orders
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", id)))
    }
}
