use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::RegistrationError;

const ID_SUFFIX_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// `<prefix>_<unix millis>_<9 base36 chars>`.
pub(crate) fn generate_id(prefix: &str) -> String {
    let suffix: String = (0..9)
        .map(|_| ID_SUFFIX_ALPHABET[fastrand::usize(..ID_SUFFIX_ALPHABET.len())] as char)
        .collect();
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), suffix)
}

/// Unique identifier for a registered webhook subscription.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of subscription IDs with other string identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub String);

impl SubscriptionId {
    pub fn generate() -> Self {
        Self(generate_id("webhook"))
    }
}

/// Unique identifier for a triggered event.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn generate() -> Self {
        Self(generate_id("event"))
    }
}

/// Unique identifier for one delivery attempt-chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeliveryId(pub String);

impl DeliveryId {
    pub fn generate() -> Self {
        Self(generate_id("delivery"))
    }
}

macro_rules! impl_display_for_id {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

impl_display_for_id!(SubscriptionId, EventId, DeliveryId);

/// Shared secret used to sign deliveries. Redacted in `Debug` output.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WebhookSecret(***)")
    }
}

/// Retry behaviour for a subscription.
///
/// A delivery is attempted at most `max_retries + 1` times. The wait
/// after failed attempt `n` is `retry_delay * backoff_multiplier^(n-1)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 1_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration, backoff_multiplier: f64) -> Self {
        Self {
            max_retries,
            retry_delay_ms: retry_delay.as_millis() as u64,
            backoff_multiplier,
        }
    }

    /// Total number of attempts a delivery may make.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Backoff to wait after attempt number `failed_attempt` (1-based) fails.
    pub fn delay_after_attempt(&self, failed_attempt: u32) -> Duration {
        let exponent = failed_attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let millis = self.retry_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        // float -> int casts saturate
        Duration::from_millis(millis as u64)
    }

    pub fn validate(&self) -> Result<(), RegistrationError> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(RegistrationError::InvalidRetryPolicy(format!(
                "backoff multiplier must be >= 1, got {}",
                self.backoff_multiplier
            )));
        }
        Ok(())
    }
}

/// Input for registering a webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionSpec {
    pub name: String,
    pub url: String,
    pub secret: WebhookSecret,
    pub events: Vec<String>,
    pub headers: BTreeMap<String, String>,
    pub retry_policy: RetryPolicy,
    pub active: bool,
}

impl SubscriptionSpec {
    /// Active subscription with the default retry policy and no events.
    pub fn new(name: impl Into<String>, url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            secret: WebhookSecret::new(secret),
            events: Vec::new(),
            headers: BTreeMap::new(),
            retry_policy: RetryPolicy::default(),
            active: true,
        }
    }

    pub fn with_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }
}

/// Partial update merged into an existing subscription.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubscriptionUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub secret: Option<WebhookSecret>,
    pub events: Option<Vec<String>>,
    pub headers: Option<BTreeMap<String, String>>,
    pub retry_policy: Option<RetryPolicy>,
    pub active: Option<bool>,
}

/// A registered webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub name: String,
    pub url: String,
    pub secret: WebhookSecret,
    pub events: Vec<String>,
    pub headers: BTreeMap<String, String>,
    pub retry_policy: RetryPolicy,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_triggered: Option<DateTime<Utc>>,
    pub success_count: u64,
    pub failure_count: u64,
}

impl Subscription {
    pub fn from_spec(id: SubscriptionId, spec: SubscriptionSpec) -> Self {
        Self {
            id,
            name: spec.name,
            url: spec.url,
            secret: spec.secret,
            events: spec.events,
            headers: spec.headers,
            retry_policy: spec.retry_policy,
            active: spec.active,
            created_at: Utc::now(),
            last_triggered: None,
            success_count: 0,
            failure_count: 0,
        }
    }

    /// Whether a newly triggered event of `event_type` fans out here.
    pub fn receives(&self, event_type: &str) -> bool {
        self.active && self.events.iter().any(|e| e == event_type)
    }
}

/// Lifecycle status of a delivery.
///
/// `Pending -> InFlight -> {Success | Failed | Retrying}`,
/// `Retrying -> Pending` once the backoff elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    InFlight,
    Success,
    Failed,
    Retrying,
}

impl DeliveryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Success | DeliveryStatus::Failed)
    }
}

/// One attempt-chain of sending an event to a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    pub id: DeliveryId,
    pub subscription_id: SubscriptionId,
    pub event_id: EventId,
    pub event_type: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub status: DeliveryStatus,
    pub request_headers: BTreeMap<String, String>,
    pub payload: serde_json::Value,
    pub status_code: Option<u16>,
    pub response_time_ms: Option<u64>,
    pub response_headers: Option<BTreeMap<String, String>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Latest known state of a delivery, queued or finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryState {
    pub subscription_id: SubscriptionId,
    pub status: DeliveryStatus,
    pub attempt: u32,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Terminal outcome of a delivery, appended once to the record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub delivery: Delivery,
    pub recorded_at: DateTime<Utc>,
}

impl DeliveryRecord {
    pub fn new(delivery: Delivery) -> Self {
        Self {
            delivery,
            recorded_at: Utc::now(),
        }
    }

    pub fn status(&self) -> DeliveryStatus {
        self.delivery.status
    }
}

/// Aggregate statistics for one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStats {
    pub total_deliveries: u64,
    pub success_count: u64,
    pub failure_count: u64,
    /// Percentage in `0.0..=100.0`; zero when nothing was delivered.
    pub success_rate: f64,
    /// Mean over recorded successes; zero when there are none.
    pub average_response_time_ms: f64,
    pub last_delivery: Option<DateTime<Utc>>,
}

/// One page of delivery records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordPage {
    pub records: Vec<DeliveryRecord>,
    pub total: usize,
    pub page: usize,
    pub total_pages: usize,
}
