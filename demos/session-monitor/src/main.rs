//! Keeps a session open against one endpoint and logs what happens to it.
//!
//! ```text
//! cargo run -p session-monitor -- ws://127.0.0.1:4840 [client.json]
//! ```
//!
//! `RUST_LOG=ualink=debug` shows every state transition inside the client
//! as well.

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use ualink::prelude::*;

const DEFAULT_URL: &str = "ws://127.0.0.1:4840";

/// Logs each time the session becomes usable or stops being usable.
struct ActivityLog;

impl SessionActivityListener for ActivityLog {
    fn on_session_active(&self, session: &Session) {
        info!(session_id = %session.session_id, name = %session.session_name, "session up");
    }

    fn on_session_inactive(&self, session: &Session) {
        warn!(session_id = %session.session_id, "session down");
    }
}

fn load_config(path: Option<String>) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(ClientConfig::default());
    };
    let raw = std::fs::read(&path)?;
    Ok(serde_json::from_slice(&raw)?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let url = args.next().unwrap_or_else(|| DEFAULT_URL.to_string());
    let config = load_config(args.next())?;

    let client = UaClient::websocket(url.clone()).config(config).build();
    client.add_session_listener(Arc::new(ActivityLog));

    let mut transitions = client.session_fsm().subscribe_transitions();
    tokio::spawn(async move {
        while let Ok(t) = transitions.recv().await {
            info!(from = %t.from, event = %t.event, to = %t.to, "transition");
        }
    });

    info!(%url, "connecting");
    match client.connect().await {
        Ok(session) => info!(session_id = %session.session_id, "connected"),
        // The client keeps trying on its own only once a session existed.
        Err(e) => warn!(error = %e, "initial connect failed"),
    }

    let server_array = NodeId::numeric(0, 2254);
    match client.read_attribute(&server_array, AttributeId::Value).await {
        Ok(value) => info!(value = %value.value, "server array"),
        Err(e) => warn!(error = %e, "read failed"),
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    client.disconnect().await?;
    Ok(())
}
