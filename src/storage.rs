use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{DeliveryId, DeliveryRecord, Subscription, SubscriptionId};
use crate::worker::Job;

/// Persistence for subscriptions, the pending-delivery outbox and the
/// append-only delivery record log.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StoreError>;
    async fn delete_subscription(&self, id: &SubscriptionId) -> Result<(), StoreError>;
    async fn load_subscriptions(&self) -> Result<Vec<Subscription>, StoreError>;

    /// Upsert a job keyed by delivery id. Called on fan-out and again
    /// each time a retry is scheduled.
    async fn record_enqueue(&self, job: &Job) -> Result<(), StoreError>;
    /// Remove a job from the outbox once its delivery is terminal.
    async fn record_settled(&self, delivery_id: &DeliveryId) -> Result<(), StoreError>;
    async fn load_pending(&self) -> Result<Vec<Job>, StoreError>;

    /// Append a terminal record. At most one record is kept per delivery
    /// id; returns `false` when one was already stored.
    async fn append_record(&self, record: &DeliveryRecord) -> Result<bool, StoreError>;
    /// Records for one subscription in append order.
    async fn records_for_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Vec<DeliveryRecord>, StoreError>;
}

/// In-memory storage for lightweight deployments and tests.
#[derive(Default)]
pub struct InMemoryStorage {
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
    pending: Mutex<Vec<Job>>,
    records: Mutex<HashMap<SubscriptionId, Vec<DeliveryRecord>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        self.subscriptions
            .lock()
            .await
            .insert(subscription.id.clone(), subscription.clone());
        Ok(())
    }

    async fn delete_subscription(&self, id: &SubscriptionId) -> Result<(), StoreError> {
        self.subscriptions.lock().await.remove(id);
        Ok(())
    }

    async fn load_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        Ok(self.subscriptions.lock().await.values().cloned().collect())
    }

    async fn record_enqueue(&self, job: &Job) -> Result<(), StoreError> {
        let mut pending = self.pending.lock().await;
        match pending.iter_mut().find(|j| j.delivery.id == job.delivery.id) {
            Some(existing) => *existing = job.clone(),
            None => pending.push(job.clone()),
        }
        Ok(())
    }

    async fn record_settled(&self, delivery_id: &DeliveryId) -> Result<(), StoreError> {
        self.pending.lock().await.retain(|j| &j.delivery.id != delivery_id);
        Ok(())
    }

    async fn load_pending(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.pending.lock().await.clone())
    }

    async fn append_record(&self, record: &DeliveryRecord) -> Result<bool, StoreError> {
        let mut records = self.records.lock().await;
        let log = records
            .entry(record.delivery.subscription_id.clone())
            .or_default();
        if log.iter().any(|r| r.delivery.id == record.delivery.id) {
            return Ok(false);
        }
        log.push(record.clone());
        Ok(true)
    }

    async fn records_for_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        Ok(self.records.lock().await.get(id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::events::{Event, EventMetadata};
    use crate::headers::DeliveryHeaderNames;
    use crate::types::{DeliveryStatus, SubscriptionSpec};

    fn job() -> Job {
        let spec = SubscriptionSpec::new("crm", "https://example.test/hook", "s")
            .with_events(["user.updated"]);
        let sub = Subscription::from_spec(SubscriptionId::generate(), spec);
        let event = Event::new("user.updated", json!({}), EventMetadata::default());
        Job::for_subscription(&event, &sub, &DeliveryHeaderNames::for_product("SleepFix")).unwrap()
    }

    #[tokio::test]
    async fn outbox_upserts_by_delivery_id() {
        let storage = InMemoryStorage::new();
        let mut job = job();
        storage.record_enqueue(&job).await.unwrap();

        job.delivery.attempt = 2;
        job.delivery.status = DeliveryStatus::Retrying;
        storage.record_enqueue(&job).await.unwrap();

        let pending = storage.load_pending().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].delivery.attempt, 2);

        storage.record_settled(&job.delivery.id).await.unwrap();
        assert!(storage.load_pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn records_are_kept_per_subscription() {
        let storage = InMemoryStorage::new();
        let first = job();
        let second = job();
        storage.append_record(&DeliveryRecord::new(first.delivery.clone())).await.unwrap();
        storage.append_record(&DeliveryRecord::new(second.delivery.clone())).await.unwrap();

        let records = storage
            .records_for_subscription(&first.delivery.subscription_id)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].delivery.id, first.delivery.id);
        assert!(storage
            .records_for_subscription(&SubscriptionId::generate())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn replayed_record_is_not_appended_twice() {
        let storage = InMemoryStorage::new();
        let mut job = job();
        job.delivery.status = DeliveryStatus::Success;
        let record = DeliveryRecord::new(job.delivery.clone());

        assert!(storage.append_record(&record).await.unwrap());
        assert!(!storage.append_record(&record).await.unwrap());

        let records = storage
            .records_for_subscription(&job.delivery.subscription_id)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
    }
}
