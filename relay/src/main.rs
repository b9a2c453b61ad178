//! Relay server
//!
//! Usage:
//!   VOICE_RELAY_API_KEY=... voice-relay [config.json]

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info};
use voice_relay_lib::config::{ConfigManager, RelayConfig};
use voice_relay_lib::network::LiveConnector;
use voice_relay_lib::relay::SessionRelay;
use voice_relay_lib::server::RelayServer;
use voice_relay_lib::utils::error::AppResult;
use voice_relay_lib::utils::logging::init_logging;

const DEFAULT_CONFIG_PATH: &str = "voice-relay.json";

/// Load, override and validate the configuration
fn load_config(path: &str) -> AppResult<RelayConfig> {
    let mut config = ConfigManager::load(path)?;
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

    let config = load_config(&path).inspect_err(|err| {
        error!(code = ?err.code(), "{}", err.user_message());
    })
    .with_context(|| format!("unusable configuration at {}", path))?;

    let addr = config.bind_addr()?;
    let connector = Arc::new(LiveConnector::new(config.upstream.clone()));

    let (relay, relay_task) = SessionRelay::spawn(connector, config.relay.part_routing);
    let server = RelayServer::bind(addr, relay.clone())
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    info!(addr = %server.local_addr()?, model = %config.upstream.model, "Voice relay ready");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "Server stopped");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, shutting down");
        }
    }

    relay.shutdown();
    relay_task.await.context("relay task panicked")?;

    info!("Voice relay stopped");
    Ok(())
}
