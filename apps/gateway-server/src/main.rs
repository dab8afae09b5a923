//! Receptor gateway server.
//!
//! Run with: cargo run -p receptor-gateway-server
//!
//! Configuration is read from the file named by `RECEPTOR_GATEWAY_CONFIG`,
//! falling back to defaults.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use receptor_gateway_core::{ConnectionLocator, GatewayConfig};
use receptor_gateway_session::{ControlPlane, LocalConnectionLocator};
use receptor_gateway_transport::{
    management::create_management_router,
    websocket::{WsState, create_ws_router},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Arc::new(GatewayConfig::discover().context("loading gateway configuration")?);

    // One locator per process, shared by the transport and the control plane
    let locator: Arc<dyn ConnectionLocator> = Arc::new(LocalConnectionLocator::new());
    let control = ControlPlane::new(Arc::clone(&locator), config.timeouts);

    let app = Router::new()
        .merge(create_ws_router(WsState::new(locator, Arc::clone(&config))))
        .merge(create_management_router(
            control.clone(),
            config.server.max_body_bytes,
        ));

    let addr = config.server.listen_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Gateway listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(control))
        .await
        .context("server error")?;

    tracing::info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal(control: ControlPlane) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        return;
    }
    tracing::info!("Shutdown requested");
    control.shutdown().await;
}
