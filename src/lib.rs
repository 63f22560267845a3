//! Webhook event delivery engine for the SleepFix wellness platform.
//!
//! The application calls [`Dispatcher::trigger_event`] when something
//! happens (a user registers, a campaign launches, burnout risk is
//! detected). The dispatcher fans the event out to every active
//! subscription opted into that event type, signs each request with the
//! subscription's secret, and delivers it over HTTP with retries and
//! exponential backoff.
//!
//! ## Guarantees
//! - Registration only succeeds after a test delivery returns 2xx
//! - At-least-once delivery per matching subscription
//! - At most `max_retries + 1` attempts per delivery, strictly sequential
//! - Exactly one terminal record per delivery
//! - Triggering never blocks on, or fails because of, delivery
//!
//! ## Non-Guarantees
//! - Ordering across deliveries, even for the same subscription
//! - Exactly-once delivery
//! - Durability, unless a persistent [`Storage`] backend is supplied
//!
//! The dispatcher is an explicitly constructed value; there is no
//! process-wide instance.

pub mod catalog;
mod config;
mod dispatcher;
mod error;
mod events;
mod headers;
mod prober;
mod records;
mod registry;
mod signing;
mod storage;
mod transport;
mod types;
mod worker;

#[cfg(feature = "redis")]
mod storage_redis;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use error::{
    ConfigError,
    DeliveryFailure,
    DispatchError,
    LookupError,
    RegistrationError,
    StoreError,
    UpdateError,
};
pub use events::{
    sample_payload,
    CampaignRef,
    DeliveryMethod,
    Event,
    EventMetadata,
    EventPayload,
    InterventionRef,
    RiskLevel,
    SleepRecord,
    SleepSummary,
    UserRef,
};
pub use headers::DeliveryHeaderNames;
pub use prober::{validate_url, ProbeResult};
pub use records::{compute_stats, paginate};
pub use signing::{
    compute_signature,
    parse_delivery_headers,
    signature_header_value,
    verify_signature,
    verify_webhook_request,
    ParsedDelivery,
    VerificationError,
};
pub use storage::{InMemoryStorage, Storage};
pub use transport::{HttpResponse, HttpTransport, TransportError};
pub use types::{
    Delivery,
    DeliveryId,
    DeliveryRecord,
    DeliveryState,
    DeliveryStats,
    DeliveryStatus,
    EventId,
    RecordPage,
    RetryPolicy,
    Subscription,
    SubscriptionId,
    SubscriptionSpec,
    SubscriptionUpdate,
    WebhookSecret,
};
pub use worker::Job;

#[cfg(feature = "http")]
pub use transport::ReqwestTransport;

#[cfg(feature = "redis")]
pub use storage_redis::RedisStorage;

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStorage;
