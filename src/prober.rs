use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::catalog::WEBHOOK_TEST;
use crate::error::RegistrationError;
use crate::events::iso8601;
use crate::headers::{DeliveryHeaderNames, CONTENT_TYPE, JSON_CONTENT_TYPE, USER_AGENT};
use crate::transport::HttpTransport;
use crate::types::generate_id;

/// Parse `url` and require an http or https scheme.
pub fn validate_url(url: &str) -> Result<Url, RegistrationError> {
    let parsed = Url::parse(url).map_err(|err| RegistrationError::InvalidUrl(err.to_string()))?;
    match parsed.scheme() {
        "http" | "https" => Ok(parsed),
        other => Err(RegistrationError::InvalidProtocol(format!("{other}:"))),
    }
}

/// Outcome of a probe or health check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub ok: bool,
    pub response_time_ms: u64,
    pub status_code: Option<u16>,
    pub error: Option<String>,
}

fn test_payload(product_name: &str) -> Value {
    json!({
        "event": WEBHOOK_TEST,
        "timestamp": iso8601(Utc::now()),
        "data": {
            "message": format!("This is a test webhook from {product_name}"),
            "testId": generate_id("test"),
        },
    })
}

/// Sends synthetic test deliveries to candidate endpoints.
///
/// Only used at registration time and for explicit admin tests; the
/// delivery path never probes.
pub struct Prober {
    transport: Arc<dyn HttpTransport>,
    header_names: DeliveryHeaderNames,
    product_name: String,
    probe_timeout: Duration,
}

impl Prober {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        product_name: impl Into<String>,
        probe_timeout: Duration,
    ) -> Self {
        let product_name = product_name.into();
        Self {
            transport,
            header_names: DeliveryHeaderNames::for_product(&product_name),
            product_name,
            probe_timeout,
        }
    }

    /// POST one `webhook.test` payload. `ok` only on a 2xx response.
    pub async fn probe(&self, url: &str, headers: &BTreeMap<String, String>) -> ProbeResult {
        let body = test_payload(&self.product_name).to_string().into_bytes();

        let mut request_headers = headers.clone();
        self.header_names.strip_reserved(&mut request_headers);
        request_headers.insert(CONTENT_TYPE.to_string(), JSON_CONTENT_TYPE.to_string());
        request_headers.insert(USER_AGENT.to_string(), self.header_names.user_agent.clone());

        let started = tokio::time::Instant::now();
        let result = self
            .transport
            .post(url, &request_headers, body, self.probe_timeout)
            .await;
        let elapsed = started.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(resp) if resp.is_success() => ProbeResult {
                ok: true,
                response_time_ms: resp.elapsed.as_millis() as u64,
                status_code: Some(resp.status),
                error: None,
            },
            Ok(resp) => ProbeResult {
                ok: false,
                response_time_ms: resp.elapsed.as_millis() as u64,
                status_code: Some(resp.status),
                error: Some(format!("HTTP {}", resp.status)),
            },
            Err(err) => ProbeResult {
                ok: false,
                response_time_ms: elapsed,
                status_code: None,
                error: Some(format!("Network error: {err}")),
            },
        };
        debug!(url, ok = outcome.ok, status = ?outcome.status_code, "endpoint probe finished");
        outcome
    }

    /// HEAD request to check reachability without sending a payload.
    pub async fn check_health(&self, url: &str, timeout: Duration) -> ProbeResult {
        let started = tokio::time::Instant::now();
        match self.transport.head(url, timeout).await {
            Ok(resp) => ProbeResult {
                ok: resp.is_success(),
                response_time_ms: resp.elapsed.as_millis() as u64,
                status_code: Some(resp.status),
                error: (!resp.is_success()).then(|| format!("HTTP {}", resp.status)),
            },
            Err(err) => ProbeResult {
                ok: false,
                response_time_ms: started.elapsed().as_millis() as u64,
                status_code: None,
                error: Some(err.to_string()),
            },
        }
    }
}
