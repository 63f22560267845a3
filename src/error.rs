use std::fmt;

use thiserror::Error;

use crate::types::SubscriptionId;

/// Errors returned synchronously from `register`.
///
/// The subscription is never persisted when one of these is returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// URL could not be parsed.
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    /// URL parsed but the scheme is not http/https.
    #[error("Invalid URL protocol: {0}")]
    InvalidProtocol(String),

    /// Retry policy is out of range.
    #[error("invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    /// The registration-time test delivery did not return 2xx.
    #[error("Webhook test failed: {0}")]
    ProbeFailed(String),

    /// Dispatcher has been shut down.
    #[error("dispatcher is shut down")]
    Shutdown,
}

/// Operations on an unknown subscription id.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("webhook not found: {0}")]
    NotFound(SubscriptionId),

    /// Delivery records could not be read from storage.
    #[error("delivery records unavailable: {0}")]
    Unavailable(String),
}

/// Errors from `update`: either the id is unknown or the merged fields
/// fail validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Invalid(#[from] RegistrationError),
}

/// Errors returned when triggering an event fails *before* fan-out.
///
/// Delivery failures are never surfaced through this type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Dispatcher has been shut down.
    #[error("dispatcher is shut down")]
    Shutdown,

    /// Typed payload could not be serialized.
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),
}

/// Why a single HTTP delivery attempt failed.
///
/// Every variant is retryable; 4xx responses are not special-cased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    Timeout,
    Network(String),
    HttpStatus(u16),
}

impl fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryFailure::Timeout =>
                write!(f, "request timed out"),
            DeliveryFailure::Network(message) =>
                write!(f, "network error: {message}"),
            DeliveryFailure::HttpStatus(code) =>
                write!(f, "HTTP {code}"),
        }
    }
}

/// Persistence layer failure. The dispatcher logs these and keeps going.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
