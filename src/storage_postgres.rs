use async_trait::async_trait;
use tokio_postgres::Client;

use crate::error::StoreError;
use crate::storage::Storage;
use crate::types::{DeliveryId, DeliveryRecord, Subscription, SubscriptionId};
use crate::worker::Job;

/// Postgres-backed storage. Rows hold JSONB snapshots; the pending
/// table is the delivery outbox.
pub struct PostgresStorage {
    client: Client,
}

fn backend(err: tokio_postgres::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

impl PostgresStorage {
    pub async fn new(client: Client) -> Result<Self, tokio_postgres::Error> {
        client
            .batch_execute(
                "CREATE TABLE IF NOT EXISTS webhook_subscriptions (
                    id TEXT PRIMARY KEY,
                    payload JSONB NOT NULL
                );
                CREATE TABLE IF NOT EXISTS webhook_pending (
                    id TEXT PRIMARY KEY,
                    seq BIGSERIAL,
                    payload JSONB NOT NULL
                );
                CREATE TABLE IF NOT EXISTS webhook_delivery_records (
                    id TEXT PRIMARY KEY,
                    seq BIGSERIAL,
                    subscription_id TEXT NOT NULL,
                    payload JSONB NOT NULL
                );
                CREATE INDEX IF NOT EXISTS webhook_delivery_records_subscription
                    ON webhook_delivery_records (subscription_id, seq);",
            )
            .await?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Storage for PostgresStorage {
    async fn save_subscription(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let payload = serde_json::to_value(subscription)?;
        self.client
            .execute(
                "INSERT INTO webhook_subscriptions (id, payload)
                 VALUES ($1, $2)
                 ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload",
                &[&subscription.id.0, &payload],
            )
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn delete_subscription(&self, id: &SubscriptionId) -> Result<(), StoreError> {
        self.client
            .execute("DELETE FROM webhook_subscriptions WHERE id = $1", &[&id.0])
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn load_subscriptions(&self) -> Result<Vec<Subscription>, StoreError> {
        let rows = self
            .client
            .query("SELECT payload FROM webhook_subscriptions", &[])
            .await
            .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let payload: serde_json::Value = row.try_get(0).map_err(backend)?;
                Ok(serde_json::from_value(payload)?)
            })
            .collect()
    }

    async fn record_enqueue(&self, job: &Job) -> Result<(), StoreError> {
        let payload = serde_json::to_value(job)?;
        self.client
            .execute(
                "INSERT INTO webhook_pending (id, payload)
                 VALUES ($1, $2)
                 ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload",
                &[&job.delivery.id.0, &payload],
            )
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn record_settled(&self, delivery_id: &DeliveryId) -> Result<(), StoreError> {
        self.client
            .execute("DELETE FROM webhook_pending WHERE id = $1", &[&delivery_id.0])
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn load_pending(&self) -> Result<Vec<Job>, StoreError> {
        let rows = self
            .client
            .query("SELECT payload FROM webhook_pending ORDER BY seq", &[])
            .await
            .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let payload: serde_json::Value = row.try_get(0).map_err(backend)?;
                Ok(serde_json::from_value(payload)?)
            })
            .collect()
    }

    async fn append_record(&self, record: &DeliveryRecord) -> Result<bool, StoreError> {
        let payload = serde_json::to_value(record)?;
        let inserted = self
            .client
            .execute(
                "INSERT INTO webhook_delivery_records (id, subscription_id, payload)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (id) DO NOTHING",
                &[&record.delivery.id.0, &record.delivery.subscription_id.0, &payload],
            )
            .await
            .map_err(backend)?;
        Ok(inserted > 0)
    }

    async fn records_for_subscription(
        &self,
        id: &SubscriptionId,
    ) -> Result<Vec<DeliveryRecord>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT payload FROM webhook_delivery_records
                 WHERE subscription_id = $1 ORDER BY seq",
                &[&id.0],
            )
            .await
            .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                let payload: serde_json::Value = row.try_get(0).map_err(backend)?;
                Ok(serde_json::from_value(payload)?)
            })
            .collect()
    }
}
