use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::error::{LookupError, UpdateError};
use crate::headers::DeliveryHeaderNames;
use crate::prober::validate_url;
use crate::storage::Storage;
use crate::types::{Subscription, SubscriptionId, SubscriptionUpdate};

/// Registered webhook subscriptions.
///
/// Each entry sits behind its own mutex so counter updates for one
/// subscription are atomic without serializing unrelated subscriptions.
/// Every mutation is written through to `Storage` while the entry lock
/// is held, so persisted snapshots never go backwards.
pub struct SubscriptionRegistry {
    entries: RwLock<HashMap<SubscriptionId, Arc<Mutex<Subscription>>>>,
    storage: Arc<dyn Storage>,
    header_names: DeliveryHeaderNames,
}

impl SubscriptionRegistry {
    pub fn new(storage: Arc<dyn Storage>, header_names: DeliveryHeaderNames) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            storage,
            header_names,
        }
    }

    /// Load previously persisted subscriptions without re-probing.
    pub async fn restore(&self) -> usize {
        let subscriptions = match self.storage.load_subscriptions().await {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                warn!(error = %err, "failed to load subscriptions");
                return 0;
            }
        };

        let mut guard = self.entries.write().await;
        let count = subscriptions.len();
        for subscription in subscriptions {
            guard.insert(subscription.id.clone(), Arc::new(Mutex::new(subscription)));
        }
        count
    }

    pub async fn insert(&self, mut subscription: Subscription) {
        self.strip_reserved(&subscription.id, &mut subscription.headers);
        let id = subscription.id.clone();
        let entry = Arc::new(Mutex::new(subscription));

        // Hold the entry lock until persisted so a racing counter update
        // cannot write an older snapshot afterwards.
        let locked = entry.lock().await;
        self.entries.write().await.insert(id, entry.clone());
        self.persist(&locked).await;
    }

    pub async fn get(&self, id: &SubscriptionId) -> Result<Subscription, LookupError> {
        let entry = self.entry(id).await.ok_or_else(|| LookupError::NotFound(id.clone()))?;
        let snapshot = entry.lock().await.clone();
        Ok(snapshot)
    }

    /// All subscriptions, oldest first.
    pub async fn list(&self) -> Vec<Subscription> {
        let mut all = self.snapshot_all().await;
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Active subscriptions opted into `event_type`. Order is unspecified.
    pub async fn list_active(&self, event_type: &str) -> Vec<Subscription> {
        self.snapshot_all()
            .await
            .into_iter()
            .filter(|s| s.receives(event_type))
            .collect()
    }

    /// Merge `update` into an existing subscription. Does not re-probe.
    pub async fn update(
        &self,
        id: &SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription, UpdateError> {
        if let Some(url) = update.url.as_deref() {
            validate_url(url)?;
        }
        if let Some(policy) = update.retry_policy.as_ref() {
            policy.validate()?;
        }

        let entry = self.entry(id).await.ok_or_else(|| LookupError::NotFound(id.clone()))?;
        let mut subscription = entry.lock().await;

        if let Some(name) = update.name {
            subscription.name = name;
        }
        if let Some(url) = update.url {
            subscription.url = url;
        }
        if let Some(secret) = update.secret {
            subscription.secret = secret;
        }
        if let Some(events) = update.events {
            subscription.events = events;
        }
        if let Some(mut headers) = update.headers {
            self.strip_reserved(id, &mut headers);
            subscription.headers = headers;
        }
        if let Some(policy) = update.retry_policy {
            subscription.retry_policy = policy;
        }
        if let Some(active) = update.active {
            subscription.active = active;
        }

        self.persist(&subscription).await;
        debug!(subscription_id = %id, "subscription updated");
        Ok(subscription.clone())
    }

    /// Remove a subscription. Returns whether it existed.
    pub async fn remove(&self, id: &SubscriptionId) -> bool {
        let removed = self.entries.write().await.remove(id).is_some();
        if removed {
            if let Err(err) = self.storage.delete_subscription(id).await {
                warn!(subscription_id = %id, error = %err, "failed to delete persisted subscription");
            }
        }
        removed
    }

    /// Count a successful delivery. Ignored if the subscription was deleted.
    pub async fn record_success(&self, id: &SubscriptionId, at: DateTime<Utc>) {
        let Some(entry) = self.entry(id).await else { return };
        let mut subscription = entry.lock().await;
        subscription.success_count += 1;
        subscription.last_triggered = Some(at);
        self.persist(&subscription).await;
    }

    /// Count a permanently failed delivery. Ignored if the subscription was deleted.
    pub async fn record_failure(&self, id: &SubscriptionId) {
        let Some(entry) = self.entry(id).await else { return };
        let mut subscription = entry.lock().await;
        subscription.failure_count += 1;
        self.persist(&subscription).await;
    }

    async fn entry(&self, id: &SubscriptionId) -> Option<Arc<Mutex<Subscription>>> {
        self.entries.read().await.get(id).cloned()
    }

    async fn snapshot_all(&self) -> Vec<Subscription> {
        let entries: Vec<_> = self.entries.read().await.values().cloned().collect();
        let mut out = Vec::with_capacity(entries.len());
        for entry in entries {
            out.push(entry.lock().await.clone());
        }
        out
    }

    async fn persist(&self, subscription: &Subscription) {
        if let Err(err) = self.storage.save_subscription(subscription).await {
            warn!(subscription_id = %subscription.id, error = %err, "failed to persist subscription");
        }
    }

    fn strip_reserved(
        &self,
        id: &SubscriptionId,
        headers: &mut std::collections::BTreeMap<String, String>,
    ) {
        let removed = self.header_names.strip_reserved(headers);
        if !removed.is_empty() {
            warn!(subscription_id = %id, headers = ?removed, "dropped reserved custom headers");
        }
    }
}
