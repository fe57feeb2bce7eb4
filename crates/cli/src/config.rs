//! Application configuration loaded from environment variables.

use thiserror::Error;

/// Which event store backs the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres { database_url: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("STORE_BACKEND=postgres requires DATABASE_URL")]
    MissingDatabaseUrl,
}

/// Runtime configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `STORE_BACKEND`: `memory` or `postgres` (default: `memory`)
/// - `DATABASE_URL`: connection string, required for `postgres`
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: `5`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
///
/// Unrecognized values fall back to the defaults.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: StoreBackend,
    pub max_connections: u32,
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let backend = match lookup("STORE_BACKEND").as_deref().map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("postgres") => {
                let database_url = lookup("DATABASE_URL")
                    .filter(|url| !url.trim().is_empty())
                    .ok_or(ConfigError::MissingDatabaseUrl)?;
                StoreBackend::Postgres { database_url }
            }
            _ => StoreBackend::Memory,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref().map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            backend,
            max_connections: lookup("DATABASE_MAX_CONNECTIONS")
                .and_then(|n| n.trim().parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_connections),
            log_level: lookup("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            max_connections: 5,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_values() {
        let config = load(&[]).unwrap();
        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_postgres_backend() {
        let config = load(&[
            ("STORE_BACKEND", "Postgres"),
            ("DATABASE_URL", "postgres://localhost/events"),
            ("DATABASE_MAX_CONNECTIONS", "12"),
        ])
        .unwrap();

        assert_eq!(
            config.backend,
            StoreBackend::Postgres {
                database_url: "postgres://localhost/events".to_string()
            }
        );
        assert_eq!(config.max_connections, 12);
    }

    #[test]
    fn test_postgres_without_url_fails() {
        assert_eq!(
            load(&[("STORE_BACKEND", "postgres")]).unwrap_err(),
            ConfigError::MissingDatabaseUrl
        );
        assert_eq!(
            load(&[("STORE_BACKEND", "postgres"), ("DATABASE_URL", " ")]).unwrap_err(),
            ConfigError::MissingDatabaseUrl
        );
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = load(&[
            ("STORE_BACKEND", "cassandra"),
            ("DATABASE_MAX_CONNECTIONS", "lots"),
            ("LOG_FORMAT", "xml"),
        ])
        .unwrap();

        assert_eq!(config.backend, StoreBackend::Memory);
        assert_eq!(config.max_connections, 5);
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_logging_overrides() {
        let config = load(&[("RUST_LOG", "domain=debug"), ("LOG_FORMAT", "json")]).unwrap();

        assert_eq!(config.log_level, "domain=debug");
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
