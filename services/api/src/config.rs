//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Settings of the Alma REST API client.
#[derive(Clone, Debug)]
pub struct AlmaConfig {
    pub api_key: String,
    pub base_url: String,
    /// Library the booked items are picked up at and scanned back into.
    pub library_code: String,
    pub circ_desk: String,
    pub user_id_type: String,
    pub timeout: Duration,
    /// Attempts for idempotent reads. Writes are never retried.
    pub read_retries: u32,
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub db_max_connections: u32,
    pub log_level: Level,
    pub cors_origin: Option<String>,
    pub alma: AlmaConfig,
}

const MAX_READ_RETRIES: u32 = 10;

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn check_read_retries(read_retries: u32) -> Result<u32, ConfigError> {
    if (1..=MAX_READ_RETRIES).contains(&read_retries) {
        Ok(read_retries)
    } else {
        Err(ConfigError::InvalidValue(
            "ALMA_READ_RETRIES".to_string(),
            format!("must be between 1 and {}", MAX_READ_RETRIES),
        ))
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Server and Database Settings ---
        let bind_address_str = var_or("BIND_ADDRESS", "0.0.0.0:3000");
        let bind_address = bind_address_str.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidValue("BIND_ADDRESS".to_string(), e.to_string())
        })?;

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;
        let db_max_connections = parse_var("DB_MAX_CONNECTIONS", 5u32)?;

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let cors_origin = std::env::var("CORS_ORIGIN").ok();

        // --- Load Alma Settings ---
        let api_key = std::env::var("ALMA_API_KEY")
            .map_err(|_| ConfigError::MissingVar("ALMA_API_KEY".to_string()))?;
        let mut base_url = var_or("ALMA_BASE_URL", "https://api-na.hosted.exlibrisgroup.com/");
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let timeout = Duration::from_secs(parse_var("ALMA_TIMEOUT_SECS", 10u64)?);
        let read_retries = check_read_retries(parse_var("ALMA_READ_RETRIES", 3u32)?)?;

        Ok(Self {
            bind_address,
            database_url,
            db_max_connections,
            log_level,
            cors_origin,
            alma: AlmaConfig {
                api_key,
                base_url,
                library_code: var_or("ALMA_LIBRARY_CODE", "AVS"),
                circ_desk: var_or("ALMA_CIRC_DESK", "DEFAULT_CIRC_DESK"),
                user_id_type: var_or("ALMA_USER_ID_TYPE", "UNIV_ID"),
                timeout,
                read_retries,
            },
        })
    }
}
