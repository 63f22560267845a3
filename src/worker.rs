use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::debug;

use crate::error::DeliveryFailure;
use crate::events::Event;
use crate::headers::{DeliveryHeaderNames, CONTENT_TYPE, JSON_CONTENT_TYPE, USER_AGENT};
use crate::signing::signature_header_value;
use crate::transport::{HttpResponse, HttpTransport};
use crate::types::{
    Delivery, DeliveryId, DeliveryState, DeliveryStatus, RetryPolicy, Subscription,
};

/// A unit of work consumed by workers.
///
/// The URL and retry policy are captured at fan-out so a delivery can
/// drain after its subscription is updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub delivery: Delivery,
    pub url: String,
    pub retry_policy: RetryPolicy,
    /// Serialized payload; the signature covers exactly these bytes.
    pub body: String,
    /// Wall-clock due time of a scheduled retry, so backoff survives a
    /// restart. `None` once the job is on the ready queue.
    #[serde(default)]
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Build the first attempt of `event` to `subscription`.
    pub fn for_subscription(
        event: &Event,
        subscription: &Subscription,
        names: &DeliveryHeaderNames,
    ) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_string(&event.payload)?;
        let id = DeliveryId::generate();
        let request_headers = build_request_headers(names, subscription, &event.event_type, &id, &body);

        Ok(Self {
            delivery: Delivery {
                id,
                subscription_id: subscription.id.clone(),
                event_id: event.id.clone(),
                event_type: event.event_type.clone(),
                attempt: 1,
                max_attempts: subscription.retry_policy.max_attempts(),
                status: DeliveryStatus::Pending,
                request_headers,
                payload: event.payload.clone(),
                status_code: None,
                response_time_ms: None,
                response_headers: None,
                error_message: None,
                created_at: Utc::now(),
            },
            url: subscription.url.clone(),
            retry_policy: subscription.retry_policy.clone(),
            body,
            next_attempt_at: None,
        })
    }
}

/// Custom headers first, then the fixed set, so reserved names always
/// carry the dispatcher's values.
pub fn build_request_headers(
    names: &DeliveryHeaderNames,
    subscription: &Subscription,
    event_type: &str,
    delivery_id: &DeliveryId,
    body: &str,
) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = subscription
        .headers
        .iter()
        .filter(|(name, _)| !names.is_reserved(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    headers.insert(CONTENT_TYPE.to_string(), JSON_CONTENT_TYPE.to_string());
    headers.insert(USER_AGENT.to_string(), names.user_agent.clone());
    headers.insert(names.event.clone(), event_type.to_string());
    headers.insert(names.delivery.clone(), delivery_id.0.clone());
    headers.insert(
        names.signature.clone(),
        signature_header_value(subscription.secret.as_bytes(), body.as_bytes()),
    );
    headers
}

/// Result of a single delivery attempt.
#[derive(Debug, Clone)]
pub struct AttemptReport {
    pub job: Job,
    pub outcome: Result<HttpResponse, AttemptFailure>,
}

#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub reason: DeliveryFailure,
    pub status_code: Option<u16>,
    pub elapsed: Duration,
}

/// Shared, read-only context for all workers.
pub struct WorkerContext {
    pub transport: Arc<dyn HttpTransport>,
    pub delivery_timeout: Duration,
    pub inter_delivery_delay: Duration,
    /// Live state per delivery, shared with the scheduler.
    pub states: Arc<RwLock<StateTable>>,
}

/// Main worker loop.
///
/// Each worker:
/// - Pulls jobs from the shared ready queue
/// - Makes exactly one attempt per job
/// - Reports the outcome to the scheduler, which owns retries
///
/// Jobs still queued at shutdown are left for the outbox.
pub async fn worker_loop(
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    ctx: Arc<WorkerContext>,
    report_tx: mpsc::UnboundedSender<AttemptReport>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let job = {
            let mut guard = rx.lock().await;
            tokio::select! {
                biased;
                _ = shutdown.changed() => None,
                job = guard.recv() => job,
            }
        };

        let Some(job) = job else { break };

        // An attempt that has started always reports, even during shutdown.
        let report = process_job(job, &ctx).await;
        if report_tx.send(report).is_err() {
            break;
        }

        if !ctx.inter_delivery_delay.is_zero() {
            tokio::select! {
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(ctx.inter_delivery_delay) => {}
            }
        }
    }
}

/// Process a single delivery attempt.
async fn process_job(mut job: Job, ctx: &WorkerContext) -> AttemptReport {
    job.delivery.status = DeliveryStatus::InFlight;
    set_state(&ctx.states, &job.delivery, None).await;
    debug!(
        delivery_id = %job.delivery.id,
        subscription_id = %job.delivery.subscription_id,
        attempt = job.delivery.attempt,
        "delivery attempt started"
    );

    let started = tokio::time::Instant::now();
    let result = ctx
        .transport
        .post(
            &job.url,
            &job.delivery.request_headers,
            job.body.clone().into_bytes(),
            ctx.delivery_timeout,
        )
        .await;

    let outcome = match result {
        Ok(resp) if resp.is_success() => Ok(resp),
        Ok(resp) => Err(AttemptFailure {
            reason: DeliveryFailure::HttpStatus(resp.status),
            status_code: Some(resp.status),
            elapsed: resp.elapsed,
        }),
        Err(err) => Err(AttemptFailure {
            reason: err.into(),
            status_code: None,
            elapsed: started.elapsed(),
        }),
    };

    AttemptReport { job, outcome }
}

/// Latest state per delivery.
///
/// Non-terminal entries stay until the delivery settles. Only the most
/// recent `terminal_capacity` terminal entries are kept; older outcomes
/// are still available from the record store.
#[derive(Debug, Default)]
pub struct StateTable {
    states: HashMap<DeliveryId, DeliveryState>,
    finished: VecDeque<DeliveryId>,
    terminal_capacity: usize,
}

impl StateTable {
    pub fn new(terminal_capacity: usize) -> Self {
        Self {
            terminal_capacity,
            ..Self::default()
        }
    }

    pub fn get(&self, id: &DeliveryId) -> Option<&DeliveryState> {
        self.states.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeliveryId, &DeliveryState)> {
        self.states.iter()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn set(&mut self, delivery: &Delivery, last_error: Option<String>) {
        let state = DeliveryState {
            subscription_id: delivery.subscription_id.clone(),
            status: delivery.status,
            attempt: delivery.attempt,
            last_error,
            updated_at: Utc::now(),
        };
        let terminal = state.status.is_terminal();
        let previous = self.states.insert(delivery.id.clone(), state);
        let was_terminal = previous.is_some_and(|p| p.status.is_terminal());

        if terminal && !was_terminal {
            self.finished.push_back(delivery.id.clone());
            while self.finished.len() > self.terminal_capacity {
                let Some(oldest) = self.finished.pop_front() else { break };
                self.states.remove(&oldest);
            }
        }
    }
}

pub(crate) async fn set_state(
    states: &RwLock<StateTable>,
    delivery: &Delivery,
    last_error: Option<String>,
) {
    states.write().await.set(delivery, last_error);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::events::EventMetadata;
    use crate::signing::verify_signature;
    use crate::types::{SubscriptionId, SubscriptionSpec};

    #[test]
    fn job_headers_are_signed_and_cannot_be_clobbered() {
        let names = DeliveryHeaderNames::for_product("SleepFix");
        let spec = SubscriptionSpec::new("crm", "https://example.test/hook", "s3cr3t")
            .with_events(["campaign.launched"])
            .with_header("User-Agent", "evil")
            .with_header("X-Team", "wellness");
        let sub = Subscription::from_spec(SubscriptionId::generate(), spec);
        let event = Event::new("campaign.launched", json!({"campaign": {"id": "c1"}}), EventMetadata::default());

        let job = Job::for_subscription(&event, &sub, &names).unwrap();
        let headers = &job.delivery.request_headers;

        assert_eq!(headers["User-Agent"], "SleepFix-Webhook/1.0");
        assert_eq!(headers["Content-Type"], "application/json");
        assert_eq!(headers["X-SleepFix-Event"], "campaign.launched");
        assert_eq!(headers["X-SleepFix-Delivery"], job.delivery.id.0);
        assert_eq!(headers["X-Team"], "wellness");
        assert!(verify_signature(b"s3cr3t", job.body.as_bytes(), &headers["X-SleepFix-Signature"]));

        assert_eq!(job.delivery.attempt, 1);
        assert_eq!(job.delivery.max_attempts, 4);
        assert_eq!(job.delivery.status, DeliveryStatus::Pending);
        assert_eq!(job.url, "https://example.test/hook");
    }

    #[test]
    fn state_table_keeps_only_recent_terminal_entries() {
        let names = DeliveryHeaderNames::for_product("SleepFix");
        let spec = SubscriptionSpec::new("crm", "https://example.test/hook", "s")
            .with_events(["user.updated"]);
        let sub = Subscription::from_spec(SubscriptionId::generate(), spec);
        let event = Event::new("user.updated", json!({}), EventMetadata::default());
        let jobs: Vec<Job> = (0..3)
            .map(|_| Job::for_subscription(&event, &sub, &names).unwrap())
            .collect();

        let mut table = StateTable::new(2);
        for job in &jobs {
            table.set(&job.delivery, None);
        }
        assert_eq!(table.len(), 3);

        for job in &jobs {
            let mut delivery = job.delivery.clone();
            delivery.status = DeliveryStatus::Success;
            table.set(&delivery, None);
            // Repeated terminal writes do not count twice.
            table.set(&delivery, None);
        }
        assert_eq!(table.len(), 2);
        assert!(table.get(&jobs[0].delivery.id).is_none());
        assert_eq!(
            table.get(&jobs[2].delivery.id).map(|s| s.status),
            Some(DeliveryStatus::Success)
        );
    }
}
