//! Shared configuration helpers for the vehicle bridge services.
//!
//! Configuration is layered: compiled-in defaults, then an optional TOML file
//! named by `<PREFIX>CONFIG`, then individual environment overrides.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use thiserror::Error;

/// Error type for configuration related failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Implemented by every service configuration struct.
pub trait ServiceConfig: DeserializeOwned + Default {
    /// Environment variable prefix, e.g. `VEHICLE_GATEWAY_`.
    const PREFIX: &'static str;

    /// Apply `<PREFIX>*` environment variables on top of the loaded values.
    fn apply_environment_overrides(&mut self, prefix: &str);

    /// Reject configurations the service cannot start with.
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}

/// Load a service configuration from defaults, the optional TOML file and the
/// environment, in that order.
pub fn load<T: ServiceConfig>() -> Result<T, ConfigError> {
    let file_var = format!("{}CONFIG", T::PREFIX);
    let mut config = match env::var(&file_var) {
        Ok(path) if !path.is_empty() => from_file::<T>(&path)?,
        _ => {
            tracing::debug!(var = %file_var, "no config file configured, using defaults");
            T::default()
        }
    };
    config.apply_environment_overrides(T::PREFIX);
    config.validate()?;
    Ok(config)
}

/// Parse a TOML configuration file. Missing keys fall back to `Default`
/// when the struct is annotated with `#[serde(default)]`.
pub fn from_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a non-empty string override.
pub fn env_string(var: &str) -> Option<String> {
    env::var(var).ok().filter(|value| !value.is_empty())
}

/// Read and parse an override, logging and ignoring values that do not parse.
pub fn env_parse<V>(var: &str) -> Option<V>
where
    V: FromStr,
    V::Err: std::fmt::Display,
{
    let value = env_string(var)?;
    value
        .parse::<V>()
        .inspect_err(|error| {
            tracing::warn!(%var, %value, %error, "invalid override, using configured value");
        })
        .ok()
}

/// Overwrite `target` when `var` is set.
pub fn override_string(target: &mut String, var: &str) {
    if let Some(value) = env_string(var) {
        *target = value;
    }
}

/// Overwrite `target` when `var` is set and parses.
pub fn override_parsed<V>(target: &mut V, var: &str)
where
    V: FromStr,
    V::Err: std::fmt::Display,
{
    if let Some(value) = env_parse(var) {
        *target = value;
    }
}
