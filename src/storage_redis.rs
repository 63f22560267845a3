use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;

use crate::error::StoreError;
use crate::storage::Storage;
use crate::types::{DeliveryId, DeliveryRecord, Subscription, SubscriptionId};
use crate::worker::Job;

/// Redis-backed storage.
///
/// Subscriptions and the pending outbox are hashes keyed by id; delivery
/// records are one list per subscription, guarded by a hash of the
/// delivery ids already recorded.
pub struct RedisStorage {
    client: redis::Client,
    prefix: String,
}

// Marks the delivery id and appends in one step. Returns 0 if the id was
// already recorded.
const APPEND_RECORD_SCRIPT: &str = r#"
if redis.call('HSETNX', KEYS[1], ARGV[1], 1) == 0 then
    return 0
end
redis.call('RPUSH', KEYS[2], ARGV[2])
return 1
"#;

fn backend(err: redis::RedisError) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl RedisStorage {
    pub fn new(client: redis::Client, prefix: impl Into<String>) -> Self {
        Self {
            client,
            prefix: prefix.into(),
        }
    }

    fn subscriptions_key(&self) -> String {
        format!("{}:subscriptions", self.prefix)
    }

    fn pending_key(&self) -> String {
        format!("{}:pending", self.prefix)
    }

    fn records_key(&self, id: &SubscriptionId) -> String {
        format!("{}:records:{}", self.prefix, id.0)
    }

    fn recorded_key(&self) -> String {
        format!("{}:recorded", self.prefix)
    }

    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let payload = serde_json::to_string(subscription)?;
        let mut conn = self.connection().await?;
        let _: () = conn
            .hset(self.subscriptions_key(), &subscription.id.0, payload)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_subscription(&self, id: &SubscriptionId) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .hdel(self.subscriptions_key(), &id.0)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn load_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        let mut conn = self.connection().await?;
        let map: HashMap<String, String> = conn
            .hgetall(self.subscriptions_key())
            .await
            .map_err(backend)?;
        map.values()
            .map(|v| serde_json::from_str(v).map_err(StoreError::from))
            .collect()
    }

    async fn record_enqueue(&self, job: &Job) -> Result<(), StoreError> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.connection().await?;
        let _: () = conn
            .hset(self.pending_key(), &job.delivery.id.0, payload)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn record_settled(&self, delivery_id: &DeliveryId) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let _: () = conn
            .hdel(self.pending_key(), &delivery_id.0)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn load_pending(&self) -> Result<Vec<Job>, StoreError> {
        let mut conn = self.connection().await?;
        let map: HashMap<String, String> = conn
            .hgetall(self.pending_key())
            .await
            .map_err(backend)?;
        let mut jobs = map
            .values()
            .map(|v| serde_json::from_str::<Job>(v).map_err(StoreError::from))
            .collect::<Result<Vec<_>, _>>()?;
        jobs.sort_by(|a, b| a.delivery.created_at.cmp(&b.delivery.created_at));
        Ok(jobs)
    }

    async fn append_record(&self, record: &DeliveryRecord) -> Result<bool, StoreError> {
        let payload = serde_json::to_string(record)?;
        let mut conn = self.connection().await?;
        let appended: i64 = redis::Script::new(APPEND_RECORD_SCRIPT)
            .key(self.recorded_key())
            .key(self.records_key(&record.delivery.subscription_id))
            .arg(&record.delivery.id.0)
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;
        Ok(appended == 1)
    }

    async fn records_for_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let mut conn = self.connection().await?;
        let values: Vec<String> = conn
            .lrange(self.records_key(id), 0, -1)
            .await
            .map_err(backend)?;
        values
            .iter()
            .map(|v| serde_json::from_str(v).map_err(StoreError::from))
            .collect()
    }
}
