use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::DeliveryFailure;

/// Response metadata from a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub elapsed: Duration,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport-level failure: no HTTP status was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Network(String),
}

impl From<TransportError> for DeliveryFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => DeliveryFailure::Timeout,
            TransportError::Network(message) => DeliveryFailure::Network(message),
        }
    }
}

/// Outbound HTTP used by the dispatcher and the prober.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &BTreeMap<String, String>,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<HttpResponse, TransportError>;

    async fn head(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError>;
}

#[cfg(feature = "http")]
pub use reqwest_transport::ReqwestTransport;

#[cfg(feature = "http")]
mod reqwest_transport {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::{HttpResponse, HttpTransport, TransportError};

    /// `reqwest`-backed transport.
    #[derive(Debug, Clone, Default)]
    pub struct ReqwestTransport {
        client: reqwest::Client,
    }

    impl ReqwestTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_client(client: reqwest::Client) -> Self {
            Self { client }
        }

        async fn send(&self, request: reqwest::RequestBuilder) -> Result<HttpResponse, TransportError> {
            let started = Instant::now();
            match request.send().await {
                Ok(resp) => {
                    let headers = resp
                        .headers()
                        .iter()
                        .filter_map(|(name, value)| {
                            value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
                        })
                        .collect();
                    Ok(HttpResponse {
                        status: resp.status().as_u16(),
                        headers,
                        elapsed: started.elapsed(),
                    })
                }
                Err(err) if err.is_timeout() => Err(TransportError::Timeout),
                Err(err) => Err(TransportError::Network(err.to_string())),
            }
        }
    }

    #[async_trait]
    impl HttpTransport for ReqwestTransport {
        async fn post(
            &self,
            url: &str,
            headers: &BTreeMap<String, String>,
            body: Vec<u8>,
            timeout: Duration,
        ) -> Result<HttpResponse, TransportError> {
            let mut request = self.client.post(url).body(body).timeout(timeout);
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
            self.send(request).await
        }

        async fn head(&self, url: &str, timeout: Duration) -> Result<HttpResponse, TransportError> {
            self.send(self.client.head(url).timeout(timeout)).await
        }
    }
}
