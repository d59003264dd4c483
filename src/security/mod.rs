//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → cors.rs (exact origin match; preflight answered here)
//!     → rate_limit.rs (per-IP window, 429 once exceeded)
//!     → headers.rs (security headers on every response)
//!     → sanitize.rs (operator keys, markup, parameter pollution)
//!     → Pass to route handlers
//! ```
//!
//! `pipeline.rs` declares this order and runs it as a single middleware.
//!
//! # Design Decisions
//! - Defense in depth: multiple layers of protection
//! - Fail closed: a rejected request never reaches a handler
//! - No trust in client input

pub mod cors;
pub mod headers;
pub mod pipeline;
pub mod rate_limit;
pub mod sanitize;

pub use cors::{CorsDecision, CorsGate};
pub use headers::HeaderPolicy;
pub use pipeline::{admission_middleware, AdmissionPipeline, Stage, STANDARD_ORDER};
pub use rate_limit::{Clock, ManualClock, RateDecision, RateLimiter, SystemClock};
pub use sanitize::{SanitizationChain, SanitizationReport, SanitizationRule};
