//! Admission layer for a library management backend.
//!
//! Every request passes an ordered pipeline (CORS, rate limiting, security
//! headers, input sanitization) before any route handler runs. The process
//! refuses to start unless its environment validates.

pub mod config;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod security;

pub use config::Configuration;
pub use error::{AdmissionError, ConfigurationError};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use security::AdmissionPipeline;
