//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! process environment / .env file
//!     → loader.rs (collect key/value pairs)
//!     → validation.rs (defaults, parsing, aggregated violations)
//!     → Configuration (validated, immutable)
//!     → shared via Arc to the server and every admission stage
//! ```
//!
//! # Design Decisions
//! - Config is built once at startup and never reloaded
//! - Any violation aborts startup before the listener is bound
//! - Secrets are redacted from Debug and serialized output

pub mod loader;
pub mod schema;
pub mod validation;

pub use schema::{
    Configuration, CorsConfig, Environment, LibraryPolicy, LimitsConfig, LogFormat,
    ObservabilityConfig, RateLimitConfig, Secret,
};
pub use validation::{validate_env, validate_env_os, Problem, ValidationError};
