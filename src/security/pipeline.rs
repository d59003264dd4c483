//! The admission pipeline: an explicit, ordered list of named stages every
//! request passes through before reaching a route handler.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, uri::PathAndQuery, HeaderMap, HeaderValue, Request, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::Configuration;
use crate::error::AdmissionError;
use crate::observability::metrics;
use crate::security::cors::{CorsDecision, CorsGate};
use crate::security::headers::HeaderPolicy;
use crate::security::rate_limit::{RateDecision, RateLimiter};
use crate::security::sanitize::{BodyKind, SanitizationChain, SanitizationReport};

/// A named pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Cors,
    RateLimit,
    HeaderPolicy,
    Sanitize,
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Cors => "cors",
            Stage::RateLimit => "rate_limit",
            Stage::HeaderPolicy => "header_policy",
            Stage::Sanitize => "sanitize",
        }
    }
}

/// The order requests are admitted in.
pub const STANDARD_ORDER: [Stage; 4] = [
    Stage::Cors,
    Stage::RateLimit,
    Stage::HeaderPolicy,
    Stage::Sanitize,
];

/// Identity used for requests that carry no connection info.
pub const UNKNOWN_CLIENT: &str = "unknown";

enum Outcome {
    Continue(Request<Body>),
    Respond(Response),
}

/// Runs [`STANDARD_ORDER`] and decorates whatever response comes back.
pub struct AdmissionPipeline {
    stages: Vec<Stage>,
    cors: CorsGate,
    limiter: Arc<RateLimiter>,
    headers: HeaderPolicy,
    sanitizer: SanitizationChain,
    max_body_bytes: usize,
    body_timeout: Duration,
}

impl AdmissionPipeline {
    pub fn from_config(config: &Configuration) -> Self {
        Self::with_rate_limiter(config, Arc::new(RateLimiter::new(config.rate_limit)))
    }

    /// Build with an externally owned limiter, e.g. one driven by a manual clock.
    pub fn with_rate_limiter(config: &Configuration, limiter: Arc<RateLimiter>) -> Self {
        Self {
            stages: STANDARD_ORDER.to_vec(),
            cors: CorsGate::new(config.cors.allowed_origin.clone()),
            limiter,
            headers: HeaderPolicy::new(),
            sanitizer: SanitizationChain::standard(),
            max_body_bytes: config.limits.max_body_bytes,
            body_timeout: Duration::from_secs(config.limits.request_timeout_secs),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Admit `request`, forwarding to `next` only when every stage passes.
    pub async fn admit(&self, request: Request<Body>, next: Next) -> Response {
        metrics::record_request();

        // Response headers granted by stages that have already run.
        let mut granted = HeaderMap::new();
        let mut request = request;

        for stage in &self.stages {
            let outcome = match stage {
                Stage::Cors => self.check_cors(request, &mut granted),
                Stage::RateLimit => self.check_rate_limit(request, &mut granted),
                // The header policy is attached in `finish`, for every response.
                Stage::HeaderPolicy => Outcome::Continue(request),
                Stage::Sanitize => self.sanitize(request).await,
            };

            request = match outcome {
                Outcome::Continue(request) => request,
                Outcome::Respond(response) => {
                    if response.status() != StatusCode::NO_CONTENT {
                        metrics::record_rejected(stage.name());
                    }
                    return self.finish(response, granted);
                }
            };
        }

        let response = next.run(request).await;
        self.finish(response, granted)
    }

    fn finish(&self, mut response: Response, granted: HeaderMap) -> Response {
        let headers = response.headers_mut();
        for (name, value) in granted.iter() {
            if *name == header::VARY {
                headers.append(name.clone(), value.clone());
            } else {
                headers.insert(name.clone(), value.clone());
            }
        }
        self.headers.apply(headers);
        response
    }

    fn check_cors(&self, request: Request<Body>, granted: &mut HeaderMap) -> Outcome {
        let preflight = CorsGate::is_preflight(&request);

        match self.cors.decide(request.headers().get(header::ORIGIN)) {
            CorsDecision::NotCrossOrigin => Outcome::Continue(request),
            CorsDecision::Allow(origin) => {
                self.cors.allow_headers(granted, &origin, preflight);
                if preflight {
                    let mut response = Response::new(Body::empty());
                    *response.status_mut() = StatusCode::NO_CONTENT;
                    response
                        .headers_mut()
                        .insert(header::CONTENT_LENGTH, HeaderValue::from_static("0"));
                    Outcome::Respond(response)
                } else {
                    Outcome::Continue(request)
                }
            }
            CorsDecision::Deny(origin) => {
                tracing::warn!(
                    origin = %origin,
                    method = %request.method(),
                    path = %request.uri().path(),
                    "Cross-origin request denied"
                );
                Outcome::Respond(AdmissionError::CorsDenied { origin }.into_response())
            }
        }
    }

    fn check_rate_limit(&self, request: Request<Body>, granted: &mut HeaderMap) -> Outcome {
        let client = client_identity(&request);
        let decision = self.limiter.check(&client);
        decision.status().apply_headers(granted);

        match decision {
            RateDecision::Allowed(_) => Outcome::Continue(request),
            RateDecision::Limited(status) => {
                tracing::warn!(client = %client, path = %request.uri().path(), "Rate limit exceeded");
                Outcome::Respond(
                    AdmissionError::RateLimitExceeded {
                        retry_after: status.reset_after,
                    }
                    .into_response(),
                )
            }
        }
    }

    async fn sanitize(&self, request: Request<Body>) -> Outcome {
        let (mut parts, body) = request.into_parts();
        let mut report = SanitizationReport::default();

        if let Some(query) = parts.uri.query() {
            let (clean, query_report) = self.sanitizer.sanitize_query(query);
            if !query_report.is_clean() {
                match rebuild_uri(&parts.uri, &clean) {
                    Some(uri) => parts.uri = uri,
                    None => return Outcome::Respond(AdmissionError::MalformedTarget.into_response()),
                }
            }
            report.merge(query_report);
        }

        let body = match BodyKind::from_headers(&parts.headers) {
            None => body,
            Some(kind) => {
                let read = axum::body::to_bytes(body, self.max_body_bytes);
                let bytes = match tokio::time::timeout(self.body_timeout, read).await {
                    Ok(Ok(bytes)) => bytes,
                    Err(_) => {
                        tracing::warn!(limit = ?self.body_timeout, "Request body timed out");
                        return Outcome::Respond(
                            AdmissionError::BodyTimeout {
                                limit: self.body_timeout,
                            }
                            .into_response(),
                        );
                    }
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, limit = self.max_body_bytes, "Request body rejected");
                        return Outcome::Respond(
                            AdmissionError::PayloadTooLarge {
                                limit: self.max_body_bytes,
                            }
                            .into_response(),
                        );
                    }
                };
                let (clean, body_report) = self.sanitizer.sanitize_body(kind, bytes);
                if !body_report.is_clean() {
                    parts
                        .headers
                        .insert(header::CONTENT_LENGTH, HeaderValue::from(clean.len()));
                }
                report.merge(body_report);
                Body::from(clean)
            }
        };

        if !report.is_clean() {
            for &(rule, fields) in report.changes() {
                metrics::record_sanitized(rule, fields);
            }
            if report.changed_by("operator_keys") > 0 {
                tracing::warn!(path = %parts.uri.path(), changes = ?report.changes(), "Operator keys stripped from request");
            } else {
                tracing::debug!(path = %parts.uri.path(), changes = ?report.changes(), "Request sanitized");
            }
        }

        parts.extensions.insert(report);
        Outcome::Continue(Request::from_parts(parts, body))
    }
}

/// Client identity for rate limiting: the peer IP address.
fn client_identity<B>(request: &Request<B>) -> String {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

fn rebuild_uri(uri: &Uri, query: &str) -> Option<Uri> {
    let path_and_query = if query.is_empty() {
        uri.path().to_string()
    } else {
        format!("{}?{}", uri.path(), query)
    };
    let mut parts = uri.clone().into_parts();
    parts.path_and_query = Some(PathAndQuery::from_str(&path_and_query).ok()?);
    Uri::from_parts(parts).ok()
}

/// Middleware entry point for [`AdmissionPipeline::admit`].
pub async fn admission_middleware(
    State(pipeline): State<Arc<AdmissionPipeline>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    pipeline.admit(request, next).await
}
