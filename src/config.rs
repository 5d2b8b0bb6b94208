//! Configuration management for the application
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};
use thiserror::Error;

use crate::{boundary::ErrorPolicy, database::SchemaName};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(String),

    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds `/ready` reports shutting down before the listener stops
    pub shutdown_grace_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "0.0.0.0".to_string(), port: 8080, shutdown_grace_seconds: 5 }
    }
}

/// One MySQL credential set.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"********")
            .finish()
    }
}

impl DatabaseCredentials {
    fn local(user: &str) -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3306,
            user: user.to_string(),
            password: String::new(),
        }
    }
}

/// Database configuration
///
/// `reader` is used for every read-only request, `writer` only by endpoints
/// that modify reference data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub reader: DatabaseCredentials,
    pub writer: DatabaseCredentials,
    #[serde(default = "default_schema")]
    pub default_schema: String,
}

fn default_schema() -> String {
    "compbrowser".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            reader: DatabaseCredentials::local("cpbreader"),
            writer: DatabaseCredentials::local("cpbwriter"),
            default_schema: default_schema(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Logging format: "json" or "text"
    pub format: String,
    /// Default log level if no RUST_LOG is set
    pub default_level: String,
    /// Custom filter for dependency logs
    pub dependency_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "text".to_string(),
            default_level: "info".to_string(),
            dependency_filter: Some(
                "hyper=warn,h2=warn,tower=info,tower_http=info,mio=warn,rustls=warn,sqlx=warn"
                    .to_string(),
            ),
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    /// Replace internal error details with generic messages in responses
    #[serde(default)]
    pub suppress_server_errors: bool,
}

impl Config {
    /// Load configuration from environment variables and optional config file
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv().ok();

        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        // The file location itself can only come from the environment
        if let Some(config_path) = std::env::var_os("GIVE_CONFIG") {
            let path = Path::new(&config_path);
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            }
        }

        figment = figment.merge(Env::prefixed("GIVE_").split("__"));

        figment.extract().map_err(|e| ConfigError::LoadError(e.to_string()))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (role, credentials) in
            [("reader", &self.database.reader), ("writer", &self.database.writer)]
        {
            if credentials.host.is_empty() {
                return Err(ConfigError::MissingConfig(format!("Database {role} host is required")));
            }
            if credentials.user.is_empty() {
                return Err(ConfigError::MissingConfig(format!("Database {role} user is required")));
            }
        }

        SchemaName::parse(&self.database.default_schema)
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;

        if !matches!(self.logging.format.as_str(), "json" | "text") {
            return Err(ConfigError::InvalidValue(format!(
                "Unknown logging format '{}', expected 'json' or 'text'",
                self.logging.format
            )));
        }

        Ok(())
    }

    /// Error reporting policy derived from this configuration
    pub fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy { suppress_server_errors: self.suppress_server_errors }
    }
}
