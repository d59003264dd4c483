//! Library backend front door.
//!
//! # Architecture Overview
//!
//! ```text
//!     environment / .env
//!            │
//!            ▼
//!     ┌──────────────┐   violations   ┌──────────────┐
//!     │ config       │───────────────▶│ exit(1)      │
//!     │ validation   │                └──────────────┘
//!     └──────┬───────┘
//!            │ Arc<Configuration>
//!            ▼
//!     ┌─────────────────────────────────────────────────────────┐
//!     │ http server: request id → trace → timeout               │
//!     │   ┌─────────────────────────────────────────────────┐   │
//!     │   │ admission pipeline                              │   │
//!     │   │  cors → rate limit → header policy → sanitize   │   │
//!     │   └─────────────────────────────────────────────────┘   │
//!     │                         │                               │
//!     │                         ▼                               │
//!     │                 route handlers                          │
//!     └─────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use axum::Router;

use library_gate::config::loader::load_from_process;
use library_gate::lifecycle::{signals, startup, Shutdown};
use library_gate::observability::logging::init_logging;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine; the process environment may hold everything.
    dotenvy::dotenv().ok();

    let config = match load_from_process() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Invalid configuration:");
            for violation in e.violations() {
                eprintln!("  - {}", violation);
            }
            std::process::exit(1);
        }
    };

    init_logging(&config.observability);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        port = config.port,
        cors_origin = %config.cors.allowed_origin,
        rate_limit_max = config.rate_limit.max_requests,
        rate_limit_window_minutes = config.rate_limit.window_minutes,
        mail_enabled = config.mail.is_some(),
        "Configuration loaded"
    );

    let shutdown = Shutdown::new();
    let mut server = tokio::spawn(startup::run(config, Router::new(), shutdown.subscribe()));

    tokio::select! {
        joined = &mut server => {
            joined??;
            return Ok(());
        }
        _ = signals::shutdown_on_signal(&shutdown) => {}
    }

    server.await??;
    tracing::info!("Shutdown complete");
    Ok(())
}
