//! Gateway service: validated config + transport client, served over axum.

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::routes;
use axum::Router;
use queue_rpc::RpcClient;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<RpcClient>,
    pub sign_key: Arc<str>,
    pub verbose: bool,
}

/// HTTP gateway service.
///
/// The transport client is injected, never ambient: tests construct the
/// service over a [`queue_rpc::MemoryBroker`]-backed client and drive the
/// router directly.
pub struct GatewayService {
    config: GatewayConfig,
    state: AppState,
}

impl GatewayService {
    pub fn new(config: GatewayConfig, client: Arc<RpcClient>) -> Result<Self, GatewayError> {
        config.validate()?;
        let state = AppState {
            client,
            sign_key: Arc::from(config.sign_key.as_str()),
            verbose: config.verbose,
        };
        Ok(Self { config, state })
    }

    /// Build the router. Usable standalone in tests via
    /// `tower::ServiceExt::oneshot`.
    pub fn router(&self) -> Router {
        routes::build(self.state.clone())
    }

    /// Bind the configured listen address and serve until `shutdown`
    /// resolves.
    pub async fn serve<F>(self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.config.listen_addr()?;
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr = %addr, "gateway listening");

        // Peer addresses feed the ClientIP fallback.
        axum::serve(
            listener,
            self.router()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("gateway stopped");
        Ok(())
    }
}
