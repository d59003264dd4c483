//! Configuration validation.
//!
//! # Responsibilities
//! - Parse the raw environment into a typed [`Configuration`]
//! - Apply documented defaults for optional keys
//! - Reject missing required keys and malformed values
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is a pure function of the key/value map
//! - Unknown keys are ignored
//! - Empty values count as absent

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use url::Url;
use validator::ValidateEmail;

use crate::config::schema::{
    AdminBootstrap, AuthConfig, Configuration, CorsConfig, DatabaseConfig, Environment,
    LibraryPolicy, LimitsConfig, LogFormat, MailConfig, ObservabilityConfig, RateLimitConfig,
    Secret, TokenLifetime,
};
use crate::error::ConfigurationError;

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_SMTP_PORT: u16 = 587;
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Appended to the database name when running in test mode.
pub const TEST_DATABASE_SUFFIX: &str = "_test";

/// Longest accepted rate-limit window: one week.
pub const MAX_RATE_LIMIT_WINDOW_MINUTES: u64 = 7 * 24 * 60;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Every key the validator reads.
const DECLARED_KEYS: [&str; 24] = [
    "APP_ENV",
    "PORT",
    "DATABASE_URI",
    "JWT_SECRET",
    "JWT_EXPIRES_IN",
    "CORS_ORIGIN",
    "ADMIN_EMAIL",
    "ADMIN_PASSWORD",
    "ADMIN_NAME",
    "SMTP_HOST",
    "SMTP_PORT",
    "SMTP_USER",
    "SMTP_PASS",
    "SMTP_FROM",
    "FINE_PER_DAY",
    "MAX_BORROW_DAYS",
    "MAX_BOOKS_PER_USER",
    "RATE_LIMIT_WINDOW_MINUTES",
    "RATE_LIMIT_MAX",
    "MAX_BODY_BYTES",
    "REQUEST_TIMEOUT_SECS",
    "LOG_LEVEL",
    "LOG_FORMAT",
    "METRICS_ADDRESS",
];

/// A single offending environment key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub key: &'static str,
    pub problem: Problem,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Problem {
    Missing,
    Invalid { value: String, expected: &'static str },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.problem {
            Problem::Missing => write!(f, "{} is required", self.key),
            Problem::Invalid { value, expected } => {
                write!(f, "{} has invalid value {:?} (expected {})", self.key, value, expected)
            }
        }
    }
}

/// Collects violations while reading typed values out of the environment.
struct EnvReader<'a> {
    vars: &'a HashMap<String, String>,
    errors: Vec<ValidationError>,
}

impl<'a> EnvReader<'a> {
    fn new(vars: &'a HashMap<String, String>, errors: Vec<ValidationError>) -> Self {
        Self { vars, errors }
    }

    fn already_reported(&self, key: &str) -> bool {
        self.errors.iter().any(|e| e.key == key)
    }

    fn get(&self, key: &str) -> Option<&'a str> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    fn invalid(&mut self, key: &'static str, value: &str, expected: &'static str) {
        self.errors.push(ValidationError {
            key,
            problem: Problem::Invalid {
                value: value.to_string(),
                expected,
            },
        });
    }

    fn required(&mut self, key: &'static str) -> Option<String> {
        let value = self.get(key).map(str::to_string);
        if value.is_none() && !self.already_reported(key) {
            self.errors.push(ValidationError {
                key,
                problem: Problem::Missing,
            });
        }
        value
    }

    fn optional(&self, key: &str) -> Option<String> {
        self.get(key).map(str::to_string)
    }

    fn parse_or<T: FromStr>(&mut self, key: &'static str, default: T, expected: &'static str) -> T {
        match self.get(key) {
            None => default,
            Some(raw) => match raw.parse() {
                Ok(value) => value,
                Err(_) => {
                    self.invalid(key, raw, expected);
                    default
                }
            },
        }
    }

    fn positive<T>(&mut self, key: &'static str, default: T) -> T
    where
        T: FromStr + PartialOrd + Default + Copy,
    {
        match self.get(key) {
            None => default,
            Some(raw) => match raw.parse::<T>() {
                Ok(value) if value > T::default() => value,
                _ => {
                    self.invalid(key, raw, "a positive integer");
                    default
                }
            },
        }
    }

    fn email(&mut self, key: &'static str, value: Option<String>) -> Option<String> {
        let value = value?;
        if value.validate_email() {
            Some(value)
        } else {
            self.invalid(key, &value, "a valid email address");
            None
        }
    }
}

/// Validate a raw environment and build the configuration.
///
/// Fails with a [`ConfigurationError`] naming every offending key.
pub fn validate_env<I>(vars: I) -> Result<Configuration, ConfigurationError>
where
    I: IntoIterator<Item = (String, String)>,
{
    validate_vars(vars.into_iter().collect(), Vec::new())
}

/// Like [`validate_env`], for an environment that may hold non-UTF-8 data.
///
/// Undeclared keys are skipped whatever their encoding. A declared key whose
/// value is not UTF-8 is reported as invalid.
pub fn validate_env_os<I>(vars: I) -> Result<Configuration, ConfigurationError>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut map = HashMap::new();
    let mut errors: Vec<ValidationError> = Vec::new();

    for (key, value) in vars {
        let Ok(key) = key.into_string() else {
            continue;
        };
        match value.into_string() {
            Ok(value) => {
                map.insert(key, value);
            }
            Err(raw) => {
                let Some(&declared) = DECLARED_KEYS.iter().find(|k| **k == key) else {
                    continue;
                };
                map.remove(declared);
                errors.retain(|e| e.key != declared);
                errors.push(ValidationError {
                    key: declared,
                    problem: Problem::Invalid {
                        value: raw.to_string_lossy().into_owned(),
                        expected: "UTF-8 text",
                    },
                });
            }
        }
    }

    validate_vars(map, errors)
}

fn validate_vars(
    vars: HashMap<String, String>,
    unreadable: Vec<ValidationError>,
) -> Result<Configuration, ConfigurationError> {
    let mut env = EnvReader::new(&vars, unreadable);

    let environment = env.parse_or(
        "APP_ENV",
        Environment::Development,
        "one of development, production, test",
    );
    let port = env.parse_or("PORT", DEFAULT_PORT, "a port number between 0 and 65535");

    let database_uri = env.required("DATABASE_URI").and_then(|uri| {
        if environment != Environment::Test {
            return Some(uri);
        }
        let isolated = isolate_test_database(&uri);
        if isolated.is_none() {
            env.invalid("DATABASE_URI", &uri, "a URI naming a database in test mode");
        }
        isolated
    });
    let jwt_secret = env.required("JWT_SECRET");
    let token_lifetime = env.parse_or(
        "JWT_EXPIRES_IN",
        TokenLifetime::default(),
        "a duration such as 3600, 90m, 12h or 7d",
    );

    let allowed_origin = match env.get("CORS_ORIGIN") {
        None => Some(DEFAULT_CORS_ORIGIN.to_string()),
        Some(raw) => {
            let origin = normalize_origin(raw);
            if origin.is_none() {
                env.invalid("CORS_ORIGIN", raw, "an http(s) origin such as https://library.example");
            }
            origin
        }
    };

    let admin_email = env.required("ADMIN_EMAIL");
    let admin_email = env.email("ADMIN_EMAIL", admin_email);
    let admin_password = env.required("ADMIN_PASSWORD");
    let admin_name = env.required("ADMIN_NAME");

    let mail = match env.optional("SMTP_HOST") {
        None => None,
        Some(host) => {
            let port = env.parse_or("SMTP_PORT", DEFAULT_SMTP_PORT, "a port number between 0 and 65535");
            let from = match env.optional("SMTP_FROM") {
                Some(from) => env.email("SMTP_FROM", Some(from)),
                None => admin_email.clone(),
            };
            Some(MailConfig {
                host,
                port,
                username: env.optional("SMTP_USER"),
                password: env.optional("SMTP_PASS").map(Secret::new),
                from: from.unwrap_or_default(),
            })
        }
    };

    let defaults = LibraryPolicy::default();
    let library = LibraryPolicy {
        fine_per_day: env.positive("FINE_PER_DAY", defaults.fine_per_day),
        max_borrow_days: env.positive("MAX_BORROW_DAYS", defaults.max_borrow_days),
        max_books_per_user: env.positive("MAX_BOOKS_PER_USER", defaults.max_books_per_user),
    };

    let defaults = RateLimitConfig::default();
    let mut window_minutes = env.positive("RATE_LIMIT_WINDOW_MINUTES", defaults.window_minutes);
    if window_minutes > MAX_RATE_LIMIT_WINDOW_MINUTES {
        env.invalid(
            "RATE_LIMIT_WINDOW_MINUTES",
            &window_minutes.to_string(),
            "at most 10080 minutes (one week)",
        );
        window_minutes = defaults.window_minutes;
    }
    let rate_limit = RateLimitConfig {
        window_minutes,
        max_requests: env.positive("RATE_LIMIT_MAX", defaults.max_requests),
    };

    let defaults = LimitsConfig::default();
    let limits = LimitsConfig {
        max_body_bytes: env.positive("MAX_BODY_BYTES", defaults.max_body_bytes),
        request_timeout_secs: env.positive("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),
    };

    let log_level = match env.get("LOG_LEVEL") {
        None => DEFAULT_LOG_LEVEL.to_string(),
        Some(raw) => {
            let level = raw.to_ascii_lowercase();
            if !LOG_LEVELS.contains(&level.as_str()) {
                env.invalid("LOG_LEVEL", raw, "one of trace, debug, info, warn, error");
            }
            level
        }
    };
    let log_format = env.parse_or("LOG_FORMAT", LogFormat::default_for(environment), "json or pretty");
    let metrics_address = match env.get("METRICS_ADDRESS") {
        None => None,
        Some(raw) => {
            let addr = raw.parse::<SocketAddr>().ok();
            if addr.is_none() {
                env.invalid("METRICS_ADDRESS", raw, "a socket address such as 0.0.0.0:9090");
            }
            addr
        }
    };

    if !env.errors.is_empty() {
        return Err(ConfigurationError::new(env.errors));
    }

    match (
        database_uri,
        jwt_secret,
        allowed_origin,
        admin_email,
        admin_password,
        admin_name,
    ) {
        (
            Some(uri),
            Some(jwt_secret),
            Some(allowed_origin),
            Some(email),
            Some(password),
            Some(name),
        ) => {
            Ok(Configuration {
                environment,
                port,
                database: DatabaseConfig { uri },
                auth: AuthConfig {
                    jwt_secret: Secret::new(jwt_secret),
                    token_lifetime,
                },
                cors: CorsConfig { allowed_origin },
                admin: AdminBootstrap {
                    email,
                    password: Secret::new(password),
                    name,
                },
                mail,
                library,
                rate_limit,
                limits,
                observability: ObservabilityConfig {
                    log_level,
                    log_format,
                    metrics_address,
                },
            })
        }
        // Every `None` above has already pushed a violation.
        _ => Err(ConfigurationError::new(env.errors)),
    }
}

/// Normalize an origin to `scheme://host[:port]`, rejecting wildcards, paths and
/// non-http schemes.
fn normalize_origin(raw: &str) -> Option<String> {
    let url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
        return None;
    }
    Some(url.origin().ascii_serialization())
}

/// Append [`TEST_DATABASE_SUFFIX`] to the database name, keeping any query string.
///
/// `None` when the URI names no database (`mongodb://host:27017` or a bare `/`).
fn isolate_test_database(uri: &str) -> Option<String> {
    let (base, query) = match uri.split_once('?') {
        Some((base, query)) => (base, Some(query)),
        None => (uri, None),
    };
    let authority = base.find("://")? + 3;
    let path = authority + base[authority..].find('/')?;
    if base[path + 1..].is_empty() {
        return None;
    }

    let mut isolated = format!("{}{}", base, TEST_DATABASE_SUFFIX);
    if let Some(query) = query {
        isolated.push('?');
        isolated.push_str(query);
    }
    Some(isolated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_env() -> Vec<(String, String)> {
        [
            ("DATABASE_URI", "mongodb://localhost:27017/library"),
            ("JWT_SECRET", "s3cret"),
            ("ADMIN_EMAIL", "admin@library.example"),
            ("ADMIN_PASSWORD", "changeme"),
            ("ADMIN_NAME", "Head Librarian"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    fn with(mut env: Vec<(String, String)>, key: &str, value: &str) -> Vec<(String, String)> {
        env.retain(|(k, _)| k != key);
        env.push((key.to_string(), value.to_string()));
        env
    }

    fn without(mut env: Vec<(String, String)>, key: &str) -> Vec<(String, String)> {
        env.retain(|(k, _)| k != key);
        env
    }

    #[test]
    fn test_defaults_applied() {
        let config = validate_env(base_env()).unwrap();

        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.port, 5000);
        assert_eq!(config.auth.token_lifetime.literal(), "7d");
        assert_eq!(config.cors.allowed_origin, "http://localhost:3000");
        assert_eq!(config.library.fine_per_day, 5);
        assert_eq!(config.library.max_borrow_days, 14);
        assert_eq!(config.library.max_books_per_user, 5);
        assert_eq!(config.rate_limit.window_minutes, 15);
        assert_eq!(config.rate_limit.max_requests, 100);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert!(config.mail.is_none());
        assert!(config.observability.metrics_address.is_none());
    }

    #[test]
    fn test_each_required_key_is_reported() {
        for key in ["DATABASE_URI", "JWT_SECRET", "ADMIN_EMAIL", "ADMIN_PASSWORD", "ADMIN_NAME"] {
            let err = validate_env(without(base_env(), key)).unwrap_err();
            assert_eq!(err.keys(), vec![key], "missing {} should be the only violation", key);
            assert_eq!(err.violations()[0].problem, Problem::Missing);
        }
    }

    #[test]
    fn test_all_missing_keys_aggregated() {
        let err = validate_env(Vec::new()).unwrap_err();
        let keys = err.keys();
        assert_eq!(keys.len(), 5);
        for key in ["DATABASE_URI", "JWT_SECRET", "ADMIN_EMAIL", "ADMIN_PASSWORD", "ADMIN_NAME"] {
            assert!(keys.contains(&key));
            assert!(err.to_string().contains(key));
        }
    }

    #[test]
    fn test_empty_uri_and_bad_email_both_reported() {
        let env = with(with(base_env(), "DATABASE_URI", ""), "ADMIN_EMAIL", "not-an-email");
        let err = validate_env(env).unwrap_err();

        let keys = err.keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains(&"DATABASE_URI"));
        assert!(keys.contains(&"ADMIN_EMAIL"));
    }

    #[test]
    fn test_invalid_mode_and_numbers() {
        let env = with(base_env(), "APP_ENV", "staging");
        let env = with(env, "PORT", "-1");
        let env = with(env, "FINE_PER_DAY", "five");
        let env = with(env, "MAX_BORROW_DAYS", "0");
        let env = with(env, "JWT_EXPIRES_IN", "forever");
        let err = validate_env(env).unwrap_err();

        let keys = err.keys();
        for key in ["APP_ENV", "PORT", "FINE_PER_DAY", "MAX_BORROW_DAYS", "JWT_EXPIRES_IN"] {
            assert!(keys.contains(&key), "{} should be reported, got {:?}", key, keys);
        }
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let env = with(base_env(), "SOMETHING_ELSE", "whatever");
        assert!(validate_env(env).is_ok());
    }

    #[test]
    fn test_test_mode_isolates_database() {
        let env = with(base_env(), "APP_ENV", "test");
        let config = validate_env(env).unwrap();
        assert_eq!(config.database.uri, "mongodb://localhost:27017/library_test");

        let env = with(base_env(), "APP_ENV", "test");
        let env = with(env, "DATABASE_URI", "mongodb://db/library?retryWrites=true");
        let config = validate_env(env).unwrap();
        assert_eq!(config.database.uri, "mongodb://db/library_test?retryWrites=true");
    }

    #[test]
    fn test_test_mode_requires_database_name() {
        for uri in ["mongodb://localhost:27017", "mongodb://localhost:27017/", "mongodb://db/?w=1"] {
            let env = with(base_env(), "APP_ENV", "test");
            let err = validate_env(with(env, "DATABASE_URI", uri)).unwrap_err();
            assert_eq!(err.keys(), vec!["DATABASE_URI"], "{} names no database", uri);
        }

        // Outside test mode the URI is used as given.
        let config = validate_env(with(base_env(), "DATABASE_URI", "mongodb://localhost:27017")).unwrap();
        assert_eq!(config.database.uri, "mongodb://localhost:27017");
    }

    #[test]
    fn test_rate_limit_window_bounded() {
        let err = validate_env(with(base_env(), "RATE_LIMIT_WINDOW_MINUTES", "18446744073709551615"))
            .unwrap_err();
        assert_eq!(err.keys(), vec!["RATE_LIMIT_WINDOW_MINUTES"]);

        let err = validate_env(with(base_env(), "RATE_LIMIT_WINDOW_MINUTES", "10081")).unwrap_err();
        assert_eq!(err.keys(), vec!["RATE_LIMIT_WINDOW_MINUTES"]);

        let config = validate_env(with(base_env(), "RATE_LIMIT_WINDOW_MINUTES", "10080")).unwrap();
        assert_eq!(config.rate_limit.window(), std::time::Duration::from_secs(10080 * 60));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_environment() {
        use std::os::unix::ffi::OsStringExt;

        let os_env = |env: Vec<(String, String)>| -> Vec<(OsString, OsString)> {
            env.into_iter().map(|(k, v)| (k.into(), v.into())).collect()
        };
        let junk = || OsString::from_vec(vec![0xff, 0xfe]);

        let mut env = os_env(base_env());
        env.push(("JUNK".into(), junk()));
        env.push((junk(), "value".into()));
        assert!(validate_env_os(env).is_ok());

        let mut env = os_env(without(base_env(), "DATABASE_URI"));
        env.push(("DATABASE_URI".into(), junk()));
        env.push(("PORT".into(), junk()));
        let err = validate_env_os(env).unwrap_err();
        assert_eq!(err.keys(), vec!["DATABASE_URI", "PORT"]);
        assert!(matches!(
            err.violations()[0].problem,
            Problem::Invalid { expected: "UTF-8 text", .. }
        ));
    }

    #[test]
    fn test_production_defaults_to_json_logs() {
        let env = with(base_env(), "APP_ENV", "production");
        let config = validate_env(env).unwrap();
        assert_eq!(config.database.uri, "mongodb://localhost:27017/library");
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }

    #[test]
    fn test_cors_origin_rules() {
        let config = validate_env(with(base_env(), "CORS_ORIGIN", "https://library.example/")).unwrap();
        assert_eq!(config.cors.allowed_origin, "https://library.example");

        for bad in ["*", "library.example", "ftp://library.example", "https://library.example/app"] {
            let err = validate_env(with(base_env(), "CORS_ORIGIN", bad)).unwrap_err();
            assert_eq!(err.keys(), vec!["CORS_ORIGIN"], "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_mail_settings() {
        let env = with(base_env(), "SMTP_HOST", "smtp.library.example");
        let config = validate_env(env).unwrap();
        let mail = config.mail.unwrap();
        assert_eq!(mail.port, 587);
        assert_eq!(mail.from, "admin@library.example");

        let env = with(base_env(), "SMTP_HOST", "smtp.library.example");
        let env = with(env, "SMTP_FROM", "nope");
        let err = validate_env(env).unwrap_err();
        assert_eq!(err.keys(), vec!["SMTP_FROM"]);
    }
}
