//! Error types for the admission boundary.

use std::time::Duration;

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::config::validation::ValidationError;
use crate::security::rate_limit::RATE_LIMIT_MESSAGE;

/// Startup failure: every violation found in the environment.
#[derive(Debug, Error)]
#[error("invalid configuration: {}", join_violations(.violations))]
pub struct ConfigurationError {
    violations: Vec<ValidationError>,
}

impl ConfigurationError {
    pub(crate) fn new(violations: Vec<ValidationError>) -> Self {
        Self { violations }
    }

    pub fn violations(&self) -> &[ValidationError] {
        &self.violations
    }

    /// Environment keys named by the violations, in report order.
    pub fn keys(&self) -> Vec<&'static str> {
        self.violations.iter().map(|v| v.key).collect()
    }
}

fn join_violations(violations: &[ValidationError]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Terminal per-request outcomes produced by the admission pipeline.
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("{}", RATE_LIMIT_MESSAGE)]
    RateLimitExceeded { retry_after: Duration },

    #[error("origin {origin} is not allowed")]
    CorsDenied { origin: String },

    #[error("request body exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },

    #[error("request target could not be rebuilt after sanitization")]
    MalformedTarget,

    #[error("request body was not received within {} seconds", .limit.as_secs())]
    BodyTimeout { limit: Duration },
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        match self {
            AdmissionError::RateLimitExceeded { retry_after } => {
                let body = Json(ErrorResponse {
                    error: RATE_LIMIT_MESSAGE.to_string(),
                });
                let mut response = (StatusCode::TOO_MANY_REQUESTS, body).into_response();
                let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(secs));
                response
            }
            // The browser blocks the response on the missing allow-origin header;
            // no body is needed.
            AdmissionError::CorsDenied { .. } => {
                let mut response = Response::new(Body::empty());
                *response.status_mut() = StatusCode::FORBIDDEN;
                response
            }
            AdmissionError::PayloadTooLarge { .. } => {
                let body = Json(ErrorResponse {
                    error: self.to_string(),
                });
                (StatusCode::PAYLOAD_TOO_LARGE, body).into_response()
            }
            AdmissionError::MalformedTarget => {
                let body = Json(ErrorResponse {
                    error: self.to_string(),
                });
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            AdmissionError::BodyTimeout { .. } => {
                let body = Json(ErrorResponse {
                    error: self.to_string(),
                });
                (StatusCode::REQUEST_TIMEOUT, body).into_response()
            }
        }
    }
}
