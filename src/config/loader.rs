//! Configuration loading from the process environment or an env file.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::Configuration;
use crate::config::validation::validate_env_os;
use crate::error::ConfigurationError;

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read env file: {0}")]
    EnvFile(#[from] dotenvy::Error),

    #[error(transparent)]
    Invalid(#[from] ConfigurationError),
}

/// Validate the current process environment.
pub fn load_from_process() -> Result<Configuration, ConfigurationError> {
    validate_env_os(std::env::vars_os())
}

/// Read `KEY=value` pairs from an env file without touching the process environment.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>, dotenvy::Error> {
    dotenvy::from_path_iter(path)?.collect()
}

/// Load and validate configuration from an env file.
///
/// With `overlay_process`, variables already set in the process environment take
/// precedence over the file, matching how `.env` files are applied at startup.
pub fn load_env_file(path: &Path, overlay_process: bool) -> Result<Configuration, ConfigError> {
    let mut vars: Vec<(OsString, OsString)> = read_env_file(path)?
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect();
    if overlay_process {
        vars.extend(std::env::vars_os());
    }
    Ok(validate_env_os(vars)?)
}
