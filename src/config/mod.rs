//! Configuration management for device-tokens
//!
//! This module handles loading, parsing, and validating configuration
//! from YAML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::auth::{HeaderNames, IssuerConfig};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Token issuance and verification settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Storage backend configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileRead(format!("Failed to read config file: {}", e)))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(yaml);
        let config: Config = serde_yaml::from_str(&expanded)
            .map_err(|e| ConfigError::Parse(format!("Failed to parse YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables with prefix DEVICE_TOKENS_
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Ok(header) = std::env::var("DEVICE_TOKENS_AUTH_KEY_HEADER") {
            config.auth.key_header = header;
        }
        if let Ok(header) = std::env::var("DEVICE_TOKENS_AUTH_TOKEN_HEADER") {
            config.auth.token_header = header;
        }
        if let Ok(max) = std::env::var("DEVICE_TOKENS_AUTH_MAXIMUM_TOKENS_PER_USER") {
            config.auth.maximum_tokens_per_user = max.parse().map_err(|_| {
                ConfigError::Parse("Invalid maximum_tokens_per_user".to_string())
            })?;
        }
        if let Ok(secs) = std::env::var("DEVICE_TOKENS_AUTH_TOUCH_INTERVAL_SECS") {
            config.auth.touch_interval_secs = secs
                .parse()
                .map_err(|_| ConfigError::Parse("Invalid touch_interval_secs".to_string()))?;
        }

        if let Ok(backend) = std::env::var("DEVICE_TOKENS_DATABASE_BACKEND") {
            config.database.backend = match backend.to_lowercase().as_str() {
                "sqlite" => StorageBackend::Sqlite,
                "document" => StorageBackend::Document,
                other => {
                    return Err(ConfigError::InvalidValue(format!(
                        "unknown database backend '{}'",
                        other
                    )))
                }
            };
        }
        if let Ok(path) = std::env::var("DEVICE_TOKENS_DATABASE_PATH") {
            config.database.path = path;
        }

        if let Ok(level) = std::env::var("DEVICE_TOKENS_LOG_LEVEL") {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.maximum_tokens_per_user == 0 {
            return Err(ConfigError::InvalidValue(
                "maximum_tokens_per_user must be at least 1".to_string(),
            ));
        }

        for header in [&self.auth.key_header, &self.auth.token_header] {
            if http::HeaderName::from_bytes(header.as_bytes()).is_err() {
                return Err(ConfigError::InvalidValue(format!(
                    "invalid header name '{}'",
                    header
                )));
            }
        }

        if self.auth.key_header.eq_ignore_ascii_case(&self.auth.token_header) {
            return Err(ConfigError::InvalidValue(
                "key_header and token_header must differ".to_string(),
            ));
        }

        Ok(())
    }
}

/// Token authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// Header carrying the principal lookup key
    #[serde(default = "default_key_header")]
    pub key_header: String,

    /// Header carrying the raw token
    #[serde(default = "default_token_header")]
    pub token_header: String,

    /// Tokens retained per principal after a purge
    #[serde(default = "default_maximum_tokens_per_user")]
    pub maximum_tokens_per_user: usize,

    /// Minimum age of `last_used_at` before a verified use rewrites it
    #[serde(default = "default_touch_interval")]
    pub touch_interval_secs: u64,

    /// Sliding expiry applied to tokens issued by the CLI (None = never)
    #[serde(default)]
    pub default_expires_in_secs: Option<u64>,
}

impl AuthConfig {
    /// Header names for the authentication strategy
    pub fn header_names(&self) -> HeaderNames {
        HeaderNames {
            lookup_key: self.key_header.clone(),
            token: self.token_header.clone(),
        }
    }

    /// Issuer settings
    pub fn issuer_config(&self) -> IssuerConfig {
        IssuerConfig {
            maximum_tokens_per_user: self.maximum_tokens_per_user,
            touch_interval: Duration::from_secs(self.touch_interval_secs),
        }
    }

    /// Default expiry for newly issued tokens
    pub fn default_expires_in(&self) -> Option<Duration> {
        self.default_expires_in_secs.map(Duration::from_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            key_header: default_key_header(),
            token_header: default_token_header(),
            maximum_tokens_per_user: default_maximum_tokens_per_user(),
            touch_interval_secs: default_touch_interval(),
            default_expires_in_secs: None,
        }
    }
}

fn default_key_header() -> String {
    "X-API-KEY".to_string()
}

fn default_token_header() -> String {
    "X-API-TOKEN".to_string()
}

fn default_maximum_tokens_per_user() -> usize {
    20
}

fn default_touch_interval() -> u64 {
    3600
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Relational tables in SQLite
    #[default]
    Sqlite,
    /// Principal documents with embedded tokens
    Document,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseConfig {
    /// Which backend to open
    #[serde(default)]
    pub backend: StorageBackend,

    /// SQLite file or document snapshot path (`:memory:` for neither)
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "device-tokens.db".to_string()
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (`json` or `pretty`)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

/// Configuration error types
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum ConfigError {
    /// Error reading configuration file
    #[error("Failed to read configuration file: {0}")]
    FileRead(String),

    /// Error parsing configuration
    #[error("Failed to parse configuration: {0}")]
    Parse(String),

    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Expand environment variables in a string
///
/// Supports `${VAR_NAME}` syntax
fn expand_env_vars(input: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return input.to_string(),
    };

    re.replace_all(input, |caps: &regex_lite::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    })
    .into_owned()
}
