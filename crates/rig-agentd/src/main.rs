mod config;
mod http;

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use rig_agent::Agent;
use rig_core::system;
use rig_exec::builtin_registry;
use rig_observe::logger_init;

use crate::{config::Config, http::HttpCommunicator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::from_env().context("reading configuration")?;

    logger_init(&cfg.logger)?;
    info!(
        "rig-agentd starting: host={}, platform={}/{}, controller={}",
        system::hostname(),
        system::platform(),
        system::arch(),
        cfg.api_server
    );

    let comm = HttpCommunicator::new(
        &cfg.api_server,
        &cfg.agent.host_id,
        &cfg.agent.host_secret,
        cfg.request_timeout,
    )?;
    let agent = Agent::new(cfg.agent, Arc::new(comm), builtin_registry());

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutting down..."),
            Err(e) => warn!("listening for ctrl-c: {e}"),
        }
        on_signal.cancel();
    });

    agent.run(shutdown).await;
    Ok(())
}
