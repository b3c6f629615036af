//! mq-gatewayd: HTTP gateway over a message-broker RPC transport.
//!
//! Startup order matters: the broker dial and the listen bind are both
//! fatal, since the gateway is useless without either.

use anyhow::Context;
use http_gateway::{GatewayConfig, GatewayService};
use queue_rpc::{client::process_name, AmqpBroker, RpcClient};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::from_env();
    info!(
        version = http_gateway::VERSION,
        listen = %config.listen,
        broker = %config.broker_url,
        timeout_secs = config.timeout_secs,
        "starting mq-gatewayd"
    );

    let broker = AmqpBroker::connect(&config.broker_url)
        .await
        .with_context(|| format!("cannot reach broker at {}", config.broker_url))?;
    let client = Arc::new(RpcClient::new(
        Arc::new(broker),
        process_name(),
        config.timeout_secs,
    ));

    let service = GatewayService::new(config, client).context("gateway construction failed")?;
    service.serve(shutdown_signal()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown signal received");
    }
}
