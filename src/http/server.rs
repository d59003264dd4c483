//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router from the built-in and caller-supplied routes
//! - Wire up middleware (request ID, tracing, admission pipeline, timeout)
//! - Bind server to listener with client addresses attached
//! - Prune expired rate-limit windows in the background

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{body::Body, http::Request, middleware, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::Configuration;
use crate::http::request::{request_id, MakeRequestUuidV4, X_REQUEST_ID};
use crate::http::routes::{builtin_routes, not_found};
use crate::security::pipeline::{admission_middleware, AdmissionPipeline};

/// HTTP server for the library backend.
pub struct HttpServer {
    router: Router,
    pipeline: Arc<AdmissionPipeline>,
    config: Arc<Configuration>,
}

impl HttpServer {
    /// Create a server serving `routes` behind the admission pipeline.
    pub fn new(config: Arc<Configuration>, routes: Router) -> Self {
        let pipeline = Arc::new(AdmissionPipeline::from_config(&config));
        Self::with_pipeline(config, routes, pipeline)
    }

    /// Create a server around an existing pipeline.
    pub fn with_pipeline(
        config: Arc<Configuration>,
        routes: Router,
        pipeline: Arc<AdmissionPipeline>,
    ) -> Self {
        let router = Self::build_router(&config, routes, pipeline.clone());
        Self {
            router,
            pipeline,
            config,
        }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(
        config: &Arc<Configuration>,
        routes: Router,
        pipeline: Arc<AdmissionPipeline>,
    ) -> Router {
        let timeout = Duration::from_secs(config.limits.request_timeout_secs);

        builtin_routes(config.clone())
            .merge(routes)
            .fallback(not_found)
            // Inside the pipeline so a 408 is decorated like any handler response.
            .layer(TimeoutLayer::new(timeout))
            .layer(middleware::from_fn_with_state(pipeline, admission_middleware))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuidV4))
                    .layer(TraceLayer::new_for_http().make_span_with(
                        |request: &Request<Body>| {
                            tracing::info_span!(
                                "request",
                                method = %request.method(),
                                path = %request.uri().path(),
                                request_id = request_id(request).unwrap_or("-"),
                            )
                        },
                    ))
                    .layer(PropagateRequestIdLayer::new(X_REQUEST_ID)),
            )
    }

    /// The fully layered router, for in-process requests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn pipeline(&self) -> &Arc<AdmissionPipeline> {
        &self.pipeline
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            environment = %self.config.environment,
            "HTTP server starting"
        );

        let pruner = tokio::spawn(prune_windows(
            self.pipeline.clone(),
            shutdown.resubscribe(),
        ));

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        pruner.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Drop elapsed rate-limit windows once per window length.
async fn prune_windows(pipeline: Arc<AdmissionPipeline>, mut shutdown: broadcast::Receiver<()>) {
    let limiter = pipeline.rate_limiter().clone();
    let mut ticker = tokio::time::interval(limiter.window());
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = limiter.prune_expired();
                tracing::debug!(
                    removed,
                    tracked = limiter.tracked_clients(),
                    "Pruned expired rate-limit windows"
                );
            }
            _ = shutdown.recv() => break,
        }
    }
}
