//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, tracing, timeout)
//!     → security::pipeline (CORS, rate limit, header policy, sanitization)
//!     → routes.rs (built-in routes) or the caller's router
//!     → Send to client
//! ```

pub mod request;
pub mod routes;
pub mod server;

pub use request::{MakeRequestUuidV4, X_REQUEST_ID};
pub use server::HttpServer;
