//! Configuration schema definitions.
//!
//! This module defines the validated, immutable configuration consumed by the
//! server and by every admission stage. Values are only ever produced by
//! [`crate::config::validation::validate_env`].

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use serde::{Serialize, Serializer};

/// Root configuration for the library backend.
#[derive(Debug, Clone, Serialize)]
pub struct Configuration {
    /// Execution mode.
    pub environment: Environment,

    /// TCP port the listener binds on all interfaces.
    pub port: u16,

    /// Document store connection settings.
    pub database: DatabaseConfig,

    /// Token signing material.
    pub auth: AuthConfig,

    /// Cross-origin settings.
    pub cors: CorsConfig,

    /// First-run administrator identity.
    pub admin: AdminBootstrap,

    /// Outbound mail relay, when `SMTP_HOST` is set.
    pub mail: Option<MailConfig>,

    /// Borrowing policy constants.
    pub library: LibraryPolicy,

    /// Per-client request ceiling.
    pub rate_limit: RateLimitConfig,

    /// Body and timeout limits.
    pub limits: LimitsConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

impl Configuration {
    /// Address the listener binds to.
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }
}

/// Execution mode of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
    Test,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            _ => Err(()),
        }
    }
}

/// A configuration value that must never appear in logs or dumps.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the raw secret.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[redacted]")
    }
}

/// Document store configuration.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    /// Connection string. Suffixed in test mode.
    pub uri: String,
}

/// Authentication token settings.
#[derive(Debug, Clone, Serialize)]
pub struct AuthConfig {
    pub jwt_secret: Secret,
    pub token_lifetime: TokenLifetime,
}

/// A token lifetime literal such as `7d` together with its parsed length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenLifetime {
    literal: String,
    seconds: u64,
}

impl TokenLifetime {
    pub fn literal(&self) -> &str {
        &self.literal
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_secs(self.seconds)
    }
}

impl Default for TokenLifetime {
    fn default() -> Self {
        Self {
            literal: "7d".to_string(),
            seconds: 7 * 24 * 60 * 60,
        }
    }
}

impl FromStr for TokenLifetime {
    type Err = ();

    /// Accepts `<n>` (seconds) or `<n><unit>` with unit one of `s`, `m`, `h`, `d`, `w`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
        let (digits, unit) = s.split_at(split);
        let amount: u64 = digits.parse().map_err(|_| ())?;
        let multiplier = match unit {
            "" | "s" => 1,
            "m" => 60,
            "h" => 60 * 60,
            "d" => 24 * 60 * 60,
            "w" => 7 * 24 * 60 * 60,
            _ => return Err(()),
        };
        let seconds = amount.checked_mul(multiplier).ok_or(())?;
        if seconds == 0 {
            return Err(());
        }
        Ok(Self {
            literal: s.to_string(),
            seconds,
        })
    }
}

impl Serialize for TokenLifetime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.literal)
    }
}

/// Cross-origin configuration.
#[derive(Debug, Clone, Serialize)]
pub struct CorsConfig {
    /// The single origin allowed to make credentialed requests.
    pub allowed_origin: String,
}

/// Administrator identity created on first run.
#[derive(Debug, Clone, Serialize)]
pub struct AdminBootstrap {
    pub email: String,
    pub password: Secret,
    pub name: String,
}

/// Outbound mail relay settings.
#[derive(Debug, Clone, Serialize)]
pub struct MailConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<Secret>,
    pub from: String,
}

/// Library borrowing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LibraryPolicy {
    /// Fine charged per overdue day.
    pub fine_per_day: u32,
    pub max_borrow_days: u32,
    pub max_books_per_user: u32,
}

impl Default for LibraryPolicy {
    fn default() -> Self {
        Self {
            fine_per_day: 5,
            max_borrow_days: 14,
            max_books_per_user: 5,
        }
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitConfig {
    /// Window length in minutes.
    pub window_minutes: u64,

    /// Maximum requests per client per window.
    pub max_requests: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_minutes.saturating_mul(60))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_minutes: 15,
            max_requests: 100,
        }
    }
}

/// Request size and time limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimitsConfig {
    /// Largest body the sanitization stage will buffer.
    pub max_body_bytes: usize,

    /// Total time allowed per request, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 10 * 1024 * 1024, // 10MB
            request_timeout_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// JSON for production, human-readable otherwise.
    pub fn default_for(environment: Environment) -> Self {
        match environment {
            Environment::Production => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(()),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Prometheus endpoint bind address. Metrics are disabled when absent.
    pub metrics_address: Option<SocketAddr>,
}
