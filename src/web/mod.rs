//! HTTP API over the interface manager

mod routes;

use crate::config::ServerConfig;
use crate::controller::adapter::CommandAdapter;
use crate::controller::manager::InterfaceManager;
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

pub fn router<A: CommandAdapter>(manager: Arc<InterfaceManager<A>>) -> Router {
    Router::new()
        .route("/api/status", get(routes::api_status::<A>))
        .route("/api/connectivity", get(routes::api_connectivity::<A>))
        .route("/api/interfaces", get(routes::api_interfaces::<A>))
        .route("/api/config", get(routes::get_config::<A>).post(routes::load_config::<A>))
        .route("/api/reload", post(routes::api_reload::<A>))
        .route("/api/parameters/:device", get(routes::api_parameters::<A>))
        .route(
            "/api/param/:device/:name",
            get(routes::get_param::<A>).post(routes::set_param::<A>),
        )
        .route(
            "/api/:device/config",
            get(routes::get_interface_config::<A>).post(routes::load_interface_config::<A>),
        )
        .route("/api/:device/scan", get(routes::api_scan::<A>))
        .layer(TraceLayer::new_for_http())
        .with_state(manager)
}

/// Serve the API until `shutdown` fires
pub async fn run_server<A: CommandAdapter>(
    manager: Arc<InterfaceManager<A>>,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(addr = %addr, "Starting HTTP API");

    axum::serve(listener, router(manager))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}
