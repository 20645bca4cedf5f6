//! # Agent Gateway binary
//!
//! Serves the demo module behind the admission pipeline.
//!
//! ## Environment
//!
//! | Variable | Effect |
//! |---|---|
//! | `AGENT_GATEWAY_CONFIG` | JSON config file, applied before the overrides below |
//! | `AGENT_GATEWAY_BIND` | listen address, e.g. `0.0.0.0:8000` |
//! | `AGENT_GATEWAY_SEED` | 32-byte hex seed of the server keypair |
//! | `AGENT_GATEWAY_TESTNET` | `1`/`true` to query the test network |
//! | `AGENT_GATEWAY_MAX_STALENESS_SECS` | staleness window in seconds |
//! | `AGENT_GATEWAY_LIMITER` | `ip` (default here) or `stake` |
//! | `AGENT_GATEWAY_LOG_JSON` | `1` for JSON log lines |
//!
//! The demo chain client starts empty, so every sender has zero stake. That
//! is why the binary defaults to the IP limiter.

use agent_crypto::AgentKeypair;
use agent_gateway::demo::DemoModule;
use agent_gateway::domain::config::{IpLimiterConfig, StakeLimiterConfig};
use agent_gateway::{telemetry, Gateway, GatewayConfig, LimiterConfig, Network, StaticChainClient};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Load configuration from an optional file plus environment overrides.
fn load_config() -> Result<GatewayConfig> {
    let mut config = match std::env::var("AGENT_GATEWAY_CONFIG") {
        Ok(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config file {path}"))?
        }
        Err(_) => GatewayConfig {
            limiter: LimiterConfig::Ip(IpLimiterConfig::default()),
            ..GatewayConfig::default()
        },
    };

    if let Ok(bind) = std::env::var("AGENT_GATEWAY_BIND") {
        config.bind = bind
            .parse()
            .with_context(|| format!("AGENT_GATEWAY_BIND is not a socket address: {bind}"))?;
    }

    if env_flag("AGENT_GATEWAY_TESTNET") {
        config.network = Network::Testnet;
    }

    if let Ok(secs) = std::env::var("AGENT_GATEWAY_MAX_STALENESS_SECS") {
        let secs: u64 = secs
            .parse()
            .with_context(|| format!("AGENT_GATEWAY_MAX_STALENESS_SECS is not a number: {secs}"))?;
        config.max_request_staleness = Duration::from_secs(secs);
    }

    if let Ok(limiter) = std::env::var("AGENT_GATEWAY_LIMITER") {
        config.limiter = match limiter.as_str() {
            "ip" => LimiterConfig::Ip(IpLimiterConfig::default()),
            "stake" => LimiterConfig::Stake(StakeLimiterConfig::default()),
            other => bail!("AGENT_GATEWAY_LIMITER must be `ip` or `stake`, got {other}"),
        };
    }

    Ok(config)
}

fn load_keypair() -> Result<AgentKeypair> {
    match std::env::var("AGENT_GATEWAY_SEED") {
        Ok(seed) => {
            let keypair =
                AgentKeypair::from_seed_hex(seed.trim()).context("AGENT_GATEWAY_SEED is invalid")?;
            info!(address = %keypair.address(), "Loaded server keypair from environment");
            Ok(keypair)
        }
        Err(_) => {
            let keypair = AgentKeypair::generate();
            warn!(
                address = %keypair.address(),
                "AGENT_GATEWAY_SEED not set, using an ephemeral keypair"
            );
            Ok(keypair)
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing()?;

    let config = load_config()?;
    let keypair = load_keypair()?;
    let chain = Arc::new(StaticChainClient::new());

    let gateway = Arc::new(Gateway::new(
        config,
        keypair.address(),
        DemoModule::default(),
        chain,
    )?);

    gateway.serve(shutdown_signal()).await?;
    Ok(())
}
