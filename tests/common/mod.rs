#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sleepfix_webhooks::{
    Dispatcher, DispatcherConfig, HttpResponse, HttpTransport, RetryPolicy, SubscriptionId,
    SubscriptionSpec, TransportError,
};
use tokio::time::Instant;

pub const DELIVERY_HEADER: &str = "X-SleepFix-Delivery";

/// Scripted outcome of one request.
#[derive(Debug, Clone)]
pub enum Step {
    Status(u16),
    /// Hold the request open, then answer with the status.
    Slow(Duration, u16),
    Timeout,
    Refused,
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub at: Instant,
}

impl RecordedRequest {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn is_delivery(&self) -> bool {
        self.headers.contains_key(DELIVERY_HEADER)
    }
}

/// In-process transport. Each URL answers from its script in order and
/// falls back to 200 once the script runs out.
#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    fallback: Mutex<HashMap<String, Step>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, url: &str, steps: impl IntoIterator<Item = Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(steps);
    }

    /// Answer every unscripted request to `url` with `step`.
    pub fn always(&self, url: &str, step: Step) {
        self.fallback.lock().unwrap().insert(url.to_string(), step);
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Event deliveries to `url`, excluding registration probes.
    pub fn deliveries_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url == url && r.is_delivery())
            .collect()
    }

    fn next_step(&self, url: &str) -> Step {
        if let Some(step) = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|s| s.pop_front())
        {
            return step;
        }
        self.fallback
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(Step::Status(200))
    }

    fn respond(step: Step) -> Result<HttpResponse, TransportError> {
        match step {
            Step::Status(status) => Ok(HttpResponse {
                status,
                headers: BTreeMap::from([("content-type".to_string(), "text/plain".to_string())]),
                elapsed: Duration::from_millis(5),
            }),
            Step::Slow(held, status) => Ok(HttpResponse {
                status,
                headers: BTreeMap::new(),
                elapsed: held,
            }),
            Step::Timeout => Err(TransportError::Timeout),
            Step::Refused => Err(TransportError::Network("connection refused".to_string())),
        }
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn post(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Vec<u8>,
        _timeout: Duration,
    ) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            url: url.to_string(),
            headers: headers.clone(),
            body,
            at: Instant::now(),
        });
        let step = self.next_step(url);
        if let Step::Slow(held, _) = step {
            tokio::time::sleep(held).await;
        }
        Self::respond(step)
    }

    async fn head(&self, url: &str, _timeout: Duration) -> Result<HttpResponse, TransportError> {
        Self::respond(self.next_step(url))
    }
}

/// Defaults with the worker pause disabled so timings only reflect backoff.
pub fn test_config() -> DispatcherConfig {
    DispatcherConfig {
        inter_delivery_delay_ms: 0,
        ..Default::default()
    }
}

pub fn dispatcher(transport: &Arc<ScriptedTransport>) -> Dispatcher {
    dispatcher_with(test_config(), transport)
}

pub fn dispatcher_with(config: DispatcherConfig, transport: &Arc<ScriptedTransport>) -> Dispatcher {
    Dispatcher::new(config, transport.clone()).unwrap()
}

pub fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy::new(max_retries, Duration::from_millis(10), 2.0)
}

pub async fn register(
    dispatcher: &Dispatcher,
    url: &str,
    events: &[&str],
) -> SubscriptionId {
    dispatcher
        .register(SubscriptionSpec::new("test", url, "s3cr3t").with_events(events.iter().copied()))
        .await
        .unwrap()
}
