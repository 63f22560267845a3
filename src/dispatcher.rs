use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::catalog;
use crate::config::DispatcherConfig;
use crate::error::{ConfigError, DispatchError, LookupError, RegistrationError, UpdateError};
use crate::events::{Event, EventMetadata, EventPayload};
use crate::headers::DeliveryHeaderNames;
use crate::prober::{validate_url, ProbeResult, Prober};
use crate::records::{compute_stats, paginate};
use crate::registry::SubscriptionRegistry;
use crate::storage::{InMemoryStorage, Storage};
use crate::transport::HttpTransport;
use crate::types::{
    Delivery, DeliveryId, DeliveryRecord, DeliveryState, DeliveryStats, DeliveryStatus, EventId,
    RecordPage, Subscription, SubscriptionId, SubscriptionSpec, SubscriptionUpdate,
};
use crate::worker::{set_state, worker_loop, AttemptReport, Job, StateTable, WorkerContext};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::counter!(name).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// State shared between the public handle and the scheduler task.
struct Shared {
    config: DispatcherConfig,
    header_names: DeliveryHeaderNames,
    registry: SubscriptionRegistry,
    storage: Arc<dyn Storage>,
    states: Arc<RwLock<StateTable>>,
    /// Deliveries created but not yet terminal.
    outstanding: watch::Sender<usize>,
    /// New and restored jobs on their way to the scheduler.
    intake_tx: mpsc::UnboundedSender<Job>,
    is_running: AtomicBool,
}

impl Shared {
    /// One job per matching active subscription.
    async fn build_jobs(&self, event: &Event) -> Vec<Job> {
        let subscriptions = self.registry.list_active(&event.event_type).await;
        let mut jobs = Vec::with_capacity(subscriptions.len());

        for subscription in subscriptions {
            match Job::for_subscription(event, &subscription, &self.header_names) {
                Ok(job) => jobs.push(job),
                Err(err) => warn!(
                    subscription_id = %subscription.id,
                    event_id = %event.id,
                    error = %err,
                    "failed to serialize event payload"
                ),
            }
        }
        jobs
    }

    /// Count the jobs as outstanding and hand them to the scheduler.
    ///
    /// Never waits, so a caller dropping the surrounding future cannot
    /// leave the count out of step with the jobs actually handed over.
    fn admit(&self, jobs: Vec<Job>) -> usize {
        let mut admitted = 0usize;
        for job in jobs {
            self.outstanding.send_modify(|n| *n += 1);
            if let Err(err) = self.intake_tx.send(job) {
                debug!(delivery_id = %err.0.delivery.id, "scheduler stopped, delivery dropped");
                self.release_outstanding();
                continue;
            }
            admitted += 1;
        }
        admitted
    }

    fn release_outstanding(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Append the terminal record. Returns `false` when the store already
    /// held one for this delivery, i.e. the outcome is being replayed.
    async fn record_terminal(&self, delivery: &Delivery) -> bool {
        set_state(&self.states, delivery, delivery.error_message.clone()).await;
        match self.storage.append_record(&DeliveryRecord::new(delivery.clone())).await {
            Ok(appended) => appended,
            Err(err) => {
                warn!(delivery_id = %delivery.id, error = %err, "failed to append delivery record");
                true
            }
        }
    }

    /// Clear the outbox entry and stop counting the delivery.
    async fn finish(&self, delivery_id: &DeliveryId) {
        if let Err(err) = self.storage.record_settled(delivery_id).await {
            warn!(delivery_id = %delivery_id, error = %err, "failed to clear pending delivery");
        }
        self.release_outstanding();
    }
}

/// Webhook event delivery engine.
///
/// Owns the subscription registry, a bounded ready queue drained by
/// `worker_count` workers, and a scheduler task that applies attempt
/// outcomes and holds retries until their backoff elapses.
pub struct Dispatcher {
    shared: Arc<Shared>,
    prober: Prober,
    shutdown_tx: watch::Sender<bool>,
    worker_handles: Vec<JoinHandle<()>>,
    scheduler_handle: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Dispatcher backed by in-memory storage. Must be called within a
    /// Tokio runtime.
    pub fn new(
        config: DispatcherConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> Result<Self, ConfigError> {
        let storage: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        Self::new_with_storage_inner(config, transport, storage)
    }

    /// Dispatcher backed by `storage`. Persisted subscriptions are
    /// restored and deliveries left in the outbox are queued again;
    /// retries that were backing off keep their original due time.
    pub async fn with_storage(
        config: DispatcherConfig,
        transport: Arc<dyn HttpTransport>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, ConfigError> {
        let dispatcher = Self::new_with_storage_inner(config, transport, storage.clone())?;
        let restored = dispatcher.shared.registry.restore().await;

        let pending = match storage.load_pending().await {
            Ok(pending) => pending,
            Err(err) => {
                warn!(error = %err, "failed to load pending deliveries");
                Vec::new()
            }
        };
        let resumed = dispatcher.shared.admit(pending);

        info!(subscriptions = restored, deliveries = resumed, "dispatcher state restored");
        Ok(dispatcher)
    }

    fn new_with_storage_inner(
        config: DispatcherConfig,
        transport: Arc<dyn HttpTransport>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let header_names = DeliveryHeaderNames::for_product(&config.product_name);
        let (ready_tx, ready_rx) = mpsc::channel(config.queue_size);
        let shared_ready_rx = Arc::new(Mutex::new(ready_rx));
        let (report_tx, report_rx) = mpsc::unbounded_channel();
        let (intake_tx, intake_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (outstanding, _) = watch::channel(0usize);
        let states = Arc::new(RwLock::new(StateTable::new(config.terminal_state_capacity)));

        let ctx = Arc::new(WorkerContext {
            transport: transport.clone(),
            delivery_timeout: config.delivery_timeout(),
            inter_delivery_delay: config.inter_delivery_delay(),
            states: states.clone(),
        });

        let worker_handles = (0..config.worker_count)
            .map(|_| {
                tokio::spawn(worker_loop(
                    shared_ready_rx.clone(),
                    ctx.clone(),
                    report_tx.clone(),
                    shutdown_rx.clone(),
                ))
            })
            .collect();
        // The report channel closes once every worker has exited.
        drop(report_tx);

        let prober = Prober::new(transport, config.product_name.clone(), config.probe_timeout());
        let shared = Arc::new(Shared {
            registry: SubscriptionRegistry::new(storage.clone(), header_names.clone()),
            header_names,
            storage,
            states,
            outstanding,
            intake_tx,
            is_running: AtomicBool::new(true),
            config,
        });

        let scheduler = Scheduler {
            shared: shared.clone(),
            ready_tx,
            delay_heap: BinaryHeap::new(),
            spilled: VecDeque::new(),
            stopping: false,
        };
        let scheduler_handle = tokio::spawn(scheduler.run(intake_rx, report_rx, shutdown_rx));

        Ok(Self {
            shared,
            prober,
            shutdown_tx,
            worker_handles,
            scheduler_handle: Some(scheduler_handle),
        })
    }

    /// Validate, probe, and only then persist a new subscription.
    pub async fn register(&self, spec: SubscriptionSpec) -> Result<SubscriptionId, RegistrationError> {
        if !self.is_running() {
            return Err(RegistrationError::Shutdown);
        }

        let result = self.validate_and_probe(&spec).await;
        if let Err(err) = result {
            metric_inc("webhook.registration.rejected");
            warn!(name = %spec.name, url = %spec.url, error = %err, "webhook registration rejected");
            return Err(err);
        }

        let id = SubscriptionId::generate();
        self.shared
            .registry
            .insert(Subscription::from_spec(id.clone(), spec))
            .await;
        info!(subscription_id = %id, "webhook registered");
        Ok(id)
    }

    async fn validate_and_probe(&self, spec: &SubscriptionSpec) -> Result<(), RegistrationError> {
        validate_url(&spec.url)?;
        spec.retry_policy.validate()?;

        let probe = self.prober.probe(&spec.url, &spec.headers).await;
        if !probe.ok {
            let reason = probe.error.unwrap_or_else(|| "unknown error".to_string());
            return Err(RegistrationError::ProbeFailed(reason));
        }
        Ok(())
    }

    pub async fn update(
        &self,
        id: &SubscriptionId,
        update: SubscriptionUpdate,
    ) -> Result<Subscription, UpdateError> {
        self.shared.registry.update(id, update).await
    }

    /// Remove a subscription. Deliveries already created for it still
    /// run to a terminal state.
    pub async fn delete(&self, id: &SubscriptionId) -> bool {
        let removed = self.shared.registry.remove(id).await;
        if removed {
            info!(subscription_id = %id, "webhook deleted");
        }
        removed
    }

    pub async fn get(&self, id: &SubscriptionId) -> Result<Subscription, LookupError> {
        self.shared.registry.get(id).await
    }

    pub async fn list(&self) -> Vec<Subscription> {
        self.shared.registry.list().await
    }

    /// Send a test payload to an existing subscription's URL.
    pub async fn test_subscription(&self, id: &SubscriptionId) -> Result<ProbeResult, LookupError> {
        let subscription = self.shared.registry.get(id).await?;
        Ok(self.prober.probe(&subscription.url, &subscription.headers).await)
    }

    /// HEAD reachability check for a candidate URL.
    pub async fn check_health(&self, url: &str) -> Result<ProbeResult, RegistrationError> {
        validate_url(url)?;
        Ok(self
            .prober
            .check_health(url, self.shared.config.health_check_timeout())
            .await)
    }

    /// Announce an event. Returns once deliveries are handed to the
    /// scheduler, without waiting for queue space; delivery failures
    /// never surface here.
    pub async fn trigger_event(
        &self,
        event_type: &str,
        payload: Value,
        metadata: EventMetadata,
    ) -> Result<EventId, DispatchError> {
        if !self.is_running() {
            return Err(DispatchError::Shutdown);
        }

        let missing = catalog::check_payload(event_type, &payload);
        if !missing.is_empty() {
            warn!(event_type, missing = ?missing, "payload is missing documented fields");
        }

        let event = Event::new(event_type, payload, metadata);
        let jobs = self.shared.build_jobs(&event).await;
        let queued = self.shared.admit(jobs);
        debug!(event_id = %event.id, event_type = %event.event_type, queued, "event fanned out");
        Ok(event.id)
    }

    /// Typed variant of `trigger_event`.
    pub async fn trigger(
        &self,
        payload: EventPayload,
        metadata: EventMetadata,
    ) -> Result<EventId, DispatchError> {
        let body = payload
            .to_json()
            .map_err(|err| DispatchError::InvalidPayload(err.to_string()))?;
        self.trigger_event(payload.event_type(), body, metadata).await
    }

    /// Latest state of a delivery, if this process still tracks it.
    pub async fn delivery_state(&self, id: &DeliveryId) -> Option<DeliveryState> {
        self.shared.states.read().await.get(id).cloned()
    }

    /// Latest tracked state of every delivery made for one subscription.
    pub async fn delivery_states_for(&self, id: &SubscriptionId) -> HashMap<DeliveryId, DeliveryState> {
        self.shared
            .states
            .read()
            .await
            .iter()
            .filter(|(_, state)| &state.subscription_id == id)
            .map(|(delivery_id, state)| (delivery_id.clone(), state.clone()))
            .collect()
    }

    /// Terminal delivery records for a subscription, newest first.
    pub async fn deliveries(
        &self,
        id: &SubscriptionId,
        page: usize,
        page_size: usize,
        status: Option<DeliveryStatus>,
    ) -> Result<RecordPage, LookupError> {
        self.shared.registry.get(id).await?;
        let records = self.records_for(id).await?;
        Ok(paginate(records, page, page_size, status))
    }

    pub async fn stats(&self, id: &SubscriptionId) -> Result<DeliveryStats, LookupError> {
        let subscription = self.shared.registry.get(id).await?;
        let records = self.records_for(id).await?;
        Ok(compute_stats(&subscription, &records))
    }

    async fn records_for(&self, id: &SubscriptionId) -> Result<Vec<DeliveryRecord>, LookupError> {
        self.shared
            .storage
            .records_for_subscription(id)
            .await
            .map_err(|err| LookupError::Unavailable(err.to_string()))
    }

    /// Resolve once no delivery is queued, in flight, or waiting on backoff.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.outstanding.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running.load(Ordering::SeqCst)
    }

    /// Stop accepting work. Attempts already in flight finish and are
    /// recorded; queued jobs and pending retries stay in the outbox.
    pub async fn shutdown(&mut self) {
        self.shared.is_running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(true);

        for handle in self.worker_handles.drain(..) {
            let _ = handle.await;
        }
        if let Some(handle) = self.scheduler_handle.take() {
            let _ = handle.await;
        }

        // Abandoned work is no longer tracked in memory.
        self.shared.outstanding.send_replace(0);
        info!("dispatcher shut down");
    }
}

#[derive(Debug)]
struct TimedJob {
    ready_at: Instant,
    job: Job,
}

impl Eq for TimedJob {}

impl PartialEq for TimedJob {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at.eq(&other.ready_at)
    }
}

impl Ord for TimedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // Reverse for min-heap behavior
        other.ready_at.cmp(&self.ready_at)
    }
}

impl PartialOrd for TimedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Owns everything between intake and the workers: the outbox writes,
/// the retry heap, and jobs spilled while the ready queue is full.
struct Scheduler {
    shared: Arc<Shared>,
    ready_tx: mpsc::Sender<Job>,
    delay_heap: BinaryHeap<TimedJob>,
    /// Jobs that found the ready queue full, in arrival order.
    spilled: VecDeque<Job>,
    stopping: bool,
}

impl Scheduler {
    /// Runs until every worker has exited. After shutdown it keeps
    /// applying reports from attempts already in flight but stops
    /// handing out work.
    async fn run(
        mut self,
        mut intake_rx: mpsc::UnboundedReceiver<Job>,
        mut report_rx: mpsc::UnboundedReceiver<AttemptReport>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let next_ready = if self.stopping {
                None
            } else {
                self.delay_heap.peek().map(|t| t.ready_at)
            };

            tokio::select! {
                report = report_rx.recv() => match report {
                    Some(report) => self.handle_report(report).await,
                    None => break,
                },
                Some(job) = intake_rx.recv() => self.accept(job).await,
                _ = wait_until(next_ready) => self.release_due().await,
                _ = shutdown.changed(), if !self.stopping => {
                    self.stopping = true;
                }
            }

            // Every job a worker takes ends in a report, so a freed slot
            // is always followed by another pass through here.
            if !self.stopping {
                self.flush_spilled();
            }
        }

        let left = self.delay_heap.len() + self.spilled.len();
        if left > 0 {
            debug!(deliveries = left, "pending deliveries left in outbox");
        }
    }

    /// Persist a new or restored job and route it by due time.
    async fn accept(&mut self, job: Job) {
        if let Err(err) = self.shared.storage.record_enqueue(&job).await {
            warn!(delivery_id = %job.delivery.id, error = %err, "failed to persist pending delivery");
        }

        match job.next_attempt_at.and_then(remaining_until) {
            Some(remaining) => {
                set_state(&self.shared.states, &job.delivery, job.delivery.error_message.clone()).await;
                self.delay_heap.push(TimedJob {
                    ready_at: Instant::now() + remaining,
                    job,
                });
            }
            None => self.dispatch(job).await,
        }
    }

    /// Put a due job on the ready queue, or spill it if the queue is full.
    async fn dispatch(&mut self, mut job: Job) {
        job.delivery.status = DeliveryStatus::Pending;
        job.next_attempt_at = None;
        set_state(&self.shared.states, &job.delivery, job.delivery.error_message.clone()).await;

        if self.stopping {
            debug!(delivery_id = %job.delivery.id, "dispatcher stopping, delivery left pending");
            self.shared.release_outstanding();
            return;
        }
        if !self.spilled.is_empty() {
            self.spilled.push_back(job);
            return;
        }

        match self.ready_tx.try_send(job) {
            Ok(()) => metric_inc("webhook.dispatch.enqueued"),
            Err(mpsc::error::TrySendError::Full(job)) => {
                metric_inc("webhook.dispatch.spilled");
                self.spilled.push_back(job);
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                debug!(delivery_id = %job.delivery.id, "ready queue closed, delivery left pending");
                self.shared.release_outstanding();
            }
        }
    }

    fn flush_spilled(&mut self) {
        while let Some(job) = self.spilled.pop_front() {
            match self.ready_tx.try_send(job) {
                Ok(()) => metric_inc("webhook.dispatch.enqueued"),
                Err(mpsc::error::TrySendError::Full(job)) => {
                    self.spilled.push_front(job);
                    break;
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    self.shared.release_outstanding();
                }
            }
        }
    }

    async fn release_due(&mut self) {
        let now = Instant::now();
        while self.delay_heap.peek().is_some_and(|t| t.ready_at <= now) {
            let Some(TimedJob { job, .. }) = self.delay_heap.pop() else { break };
            self.dispatch(job).await;
        }
    }

    async fn handle_report(&mut self, report: AttemptReport) {
        let AttemptReport { mut job, outcome } = report;
        let shared = self.shared.clone();

        match outcome {
            Ok(resp) => {
                let delivery = &mut job.delivery;
                delivery.status = DeliveryStatus::Success;
                delivery.status_code = Some(resp.status);
                delivery.response_time_ms = Some(resp.elapsed.as_millis() as u64);
                delivery.response_headers = Some(resp.headers);
                delivery.error_message = None;

                info!(
                    delivery_id = %delivery.id,
                    subscription_id = %delivery.subscription_id,
                    event_type = %delivery.event_type,
                    attempt = delivery.attempt,
                    status = resp.status,
                    "webhook delivered"
                );
                if shared.record_terminal(delivery).await {
                    shared
                        .registry
                        .record_success(&delivery.subscription_id, Utc::now())
                        .await;
                } else {
                    debug!(delivery_id = %delivery.id, "outcome already recorded, counters unchanged");
                }
                shared.finish(&delivery.id).await;
                metric_inc("webhook.delivery.success");
            }

            Err(failure) => {
                job.delivery.status_code = failure.status_code;
                job.delivery.response_time_ms = Some(failure.elapsed.as_millis() as u64);
                job.delivery.error_message = Some(failure.reason.to_string());

                if job.delivery.attempt < job.delivery.max_attempts {
                    let delay = job.retry_policy.delay_after_attempt(job.delivery.attempt)
                        + jitter_delay(shared.config.retry_jitter_ms);
                    job.delivery.attempt += 1;
                    job.delivery.status = DeliveryStatus::Retrying;
                    job.next_attempt_at = wall_clock_after(delay);

                    warn!(
                        delivery_id = %job.delivery.id,
                        subscription_id = %job.delivery.subscription_id,
                        error = %failure.reason,
                        next_attempt = job.delivery.attempt,
                        delay_ms = delay.as_millis() as u64,
                        "webhook delivery failed, retry scheduled"
                    );
                    if let Err(err) = shared.storage.record_enqueue(&job).await {
                        warn!(delivery_id = %job.delivery.id, error = %err, "failed to persist retry");
                    }
                    set_state(&shared.states, &job.delivery, job.delivery.error_message.clone()).await;
                    self.delay_heap.push(TimedJob {
                        ready_at: Instant::now() + delay,
                        job,
                    });
                    metric_inc("webhook.delivery.retry_scheduled");
                } else {
                    job.delivery.status = DeliveryStatus::Failed;
                    warn!(
                        delivery_id = %job.delivery.id,
                        subscription_id = %job.delivery.subscription_id,
                        error = %failure.reason,
                        attempts = job.delivery.attempt,
                        "webhook delivery permanently failed"
                    );

                    if shared.record_terminal(&job.delivery).await {
                        shared.registry.record_failure(&job.delivery.subscription_id).await;

                        // Admitted before finishing so the outstanding
                        // count never drops to zero in between.
                        let announce = shared.config.emit_failure_events
                            && !self.stopping
                            && job.delivery.event_type != catalog::WEBHOOK_DELIVERY_FAILED;
                        if announce {
                            let event = Event::new(
                                catalog::WEBHOOK_DELIVERY_FAILED,
                                delivery_failed_payload(&job),
                                EventMetadata::default(),
                            );
                            let jobs = shared.build_jobs(&event).await;
                            shared.admit(jobs);
                        }
                    }

                    shared.finish(&job.delivery.id).await;
                    metric_inc("webhook.delivery.failed");
                }
            }
        }
    }
}

/// Time left until `at`, or `None` if it is already due.
fn remaining_until(at: DateTime<Utc>) -> Option<Duration> {
    (at - Utc::now()).to_std().ok().filter(|d| !d.is_zero())
}

fn wall_clock_after(delay: Duration) -> Option<DateTime<Utc>> {
    let delay = chrono::Duration::from_std(delay).ok()?;
    Utc::now().checked_add_signed(delay)
}

fn delivery_failed_payload(job: &Job) -> Value {
    let delivery = &job.delivery;
    json!({
        "webhook": { "id": delivery.subscription_id },
        "delivery": {
            "id": delivery.id,
            "eventId": delivery.event_id,
            "eventType": delivery.event_type,
            "attempts": delivery.attempt,
            "statusCode": delivery.status_code,
            "errorMessage": delivery.error_message,
        },
    })
}

fn jitter_delay(jitter_ms: u64) -> Duration {
    if jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(fastrand::u64(0..=jitter_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_is_bounded() {
        assert_eq!(jitter_delay(0), Duration::ZERO);
        for _ in 0..100 {
            assert!(jitter_delay(250) <= Duration::from_millis(250));
        }
    }

    #[test]
    fn due_times_round_trip_through_wall_clock() {
        let at = wall_clock_after(Duration::from_secs(60)).unwrap();
        let remaining = remaining_until(at).unwrap();
        assert!(remaining > Duration::from_secs(59));
        assert!(remaining <= Duration::from_secs(60));

        let past = Utc::now() - chrono::Duration::seconds(5);
        assert_eq!(remaining_until(past), None);
    }
}
