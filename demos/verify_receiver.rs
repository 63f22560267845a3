//! Minimal receiver that checks SleepFix signatures.
//!
//! ```text
//! WEBHOOK_SECRET=whsec_demo cargo run --example verify_receiver
//! ```

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use sleepfix_webhooks::{verify_webhook_request, DeliveryHeaderNames};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct ReceiverState {
    secret: Arc<String>,
    names: Arc<DeliveryHeaderNames>,
}

async fn receive(State(state): State<ReceiverState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    // Registration probes carry no delivery id or signature.
    if !headers.contains_key(state.names.delivery.as_str()) {
        info!("registration probe received");
        return StatusCode::OK;
    }

    let pairs = headers
        .iter()
        .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str(), v)));

    match verify_webhook_request(pairs, &body, state.secret.as_bytes(), &state.names) {
        Ok(parsed) => {
            info!(
                event_type = parsed.event_type.as_deref().unwrap_or_default(),
                delivery_id = parsed.delivery_id.as_deref().unwrap_or_default(),
                bytes = body.len(),
                "verified delivery"
            );
            StatusCode::OK
        }
        Err(err) => {
            warn!(error = %err, "rejected delivery");
            StatusCode::UNAUTHORIZED
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let state = ReceiverState {
        secret: Arc::new(std::env::var("WEBHOOK_SECRET").unwrap_or_else(|_| "whsec_demo".to_string())),
        names: Arc::new(DeliveryHeaderNames::for_product("SleepFix")),
    };
    let app = Router::new().route("/hooks", post(receive)).with_state(state);

    let listener = TcpListener::bind("127.0.0.1:8080").await?;
    info!(addr = %listener.local_addr()?, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
