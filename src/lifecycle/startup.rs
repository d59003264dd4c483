//! Startup orchestration.
//!
//! # Responsibilities
//! - Start the metrics exporter when configured
//! - Bind the listener on the configured port
//! - Serve until shutdown
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Configuration arrives already validated; nothing is bound otherwise
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::config::Configuration;
use crate::http::HttpServer;
use crate::observability::metrics;

/// Bring the server up and run it until `shutdown` fires.
pub async fn run(
    config: Arc<Configuration>,
    routes: Router,
    shutdown: broadcast::Receiver<()>,
) -> Result<(), std::io::Error> {
    if let Some(addr) = config.observability.metrics_address {
        metrics::init_metrics(addr);
    }

    let listener = TcpListener::bind(config.bind_address()).await?;
    tracing::info!(
        address = %listener.local_addr()?,
        "Listening for connections"
    );

    HttpServer::new(config, routes).run(listener, shutdown).await
}
