//! Register an endpoint and trigger a few events against it.
//!
//! ```text
//! WEBHOOK_URL=https://webhook.site/<id> RUST_LOG=sleepfix_webhooks=debug \
//!     cargo run --example basic
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use sleepfix_webhooks::{
    catalog, sample_payload, Dispatcher, DispatcherConfig, EventMetadata, ReqwestTransport,
    RetryPolicy, SubscriptionSpec,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let url = std::env::var("WEBHOOK_URL").unwrap_or_else(|_| "http://127.0.0.1:8080/hooks".to_string());
    let config = match std::env::var("WEBHOOK_CONFIG") {
        Ok(path) => DispatcherConfig::from_file(path)?,
        Err(_) => DispatcherConfig::default(),
    };

    let mut dispatcher = Dispatcher::new(config, Arc::new(ReqwestTransport::new()))?;

    let id = dispatcher
        .register(
            SubscriptionSpec::new("demo", url, "whsec_demo")
                .with_events([catalog::USER_REGISTERED, catalog::BURNOUT_RISK_DETECTED])
                .with_header("X-Team", "wellness")
                .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(500), 2.0)),
        )
        .await?;
    println!("registered {id}");

    dispatcher
        .trigger_event(
            catalog::USER_REGISTERED,
            sample_payload(catalog::USER_REGISTERED),
            EventMetadata::for_user("user_123"),
        )
        .await?;
    dispatcher
        .trigger_event(
            catalog::BURNOUT_RISK_DETECTED,
            json!({
                "user": {"id": "user_123", "name": "John Doe", "email": "john@example.com"},
                "riskLevel": "high",
                "riskFactors": ["sleep debt above 10h"],
            }),
            EventMetadata::for_user("user_123"),
        )
        .await?;

    dispatcher.wait_idle().await;

    let stats = dispatcher.stats(&id).await?;
    println!(
        "deliveries: {} ok, {} failed ({:.0}% success, avg {:.0}ms)",
        stats.success_count, stats.failure_count, stats.success_rate, stats.average_response_time_ms
    );

    dispatcher.shutdown().await;
    Ok(())
}
