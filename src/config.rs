//! Configuration system for Amulet.
//!
//! Configuration is loaded from multiple sources with the following precedence:
//! 1. Environment variables (highest priority)
//! 2. `config.toml` file
//! 3. Default values (lowest priority)
//!
//! # Environment Variables
//!
//! - `AMULET_SERVER_HOST` - Server bind address
//! - `AMULET_SERVER_PORT` - Server port
//! - `AMULET_DATABASE_TYPE` - "sqlite" or "postgres"
//! - `AMULET_DATABASE_URL` - Database connection URL
//! - `AMULET_ADMIN_USER` - Admin surface username
//! - `AMULET_ADMIN_PASS` - Admin surface password
//! - `AMULET_LICENSE_KEY_PREFIX` - Prefix for generated license keys
//! - `AMULET_LOG_LEVEL` - Log level (trace, debug, info, warn, error)

use config::Config;
use serde::Deserialize;
use std::env;
use std::sync::OnceLock;

use crate::errors::{AmuletError, AmuletResult};

/// Global configuration singleton.
static CONFIG: OnceLock<AmuletConfig> = OnceLock::new();

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AmuletConfig {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Admin surface credentials
    pub admin: AdminConfig,
    /// Generated license key configuration
    pub license: LicenseConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database type: "sqlite" or "postgres"
    pub db_type: String,
    /// SQLite connection URL
    pub sqlite_url: String,
    /// PostgreSQL connection URL
    pub postgres_url: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            db_type: "sqlite".to_string(),
            sqlite_url: "sqlite://amulet.db?mode=rwc".to_string(),
            postgres_url: "postgres://localhost/amulet".to_string(),
        }
    }
}

/// Admin surface credentials.
///
/// The admin API uses HTTP Basic authentication with a single shared
/// credential pair. Override the defaults in any real deployment.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub username: String,
    pub password: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
        }
    }
}

/// Generated license key configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LicenseConfig {
    /// Prefix for generated license keys (e.g., "AMU" -> "AMU-XXXX-XXXX-XXXX")
    pub key_prefix: String,
    /// Number of segments in the license key
    pub key_segments: u8,
    /// Characters per segment
    pub key_segment_length: u8,
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            key_prefix: "AMU".to_string(),
            key_segments: 4,
            key_segment_length: 4,
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AmuletConfig {
    /// Load configuration from file and environment.
    ///
    /// Configuration is loaded in this order (later sources override earlier):
    /// 1. Default values
    /// 2. `config.toml` file (optional)
    /// 3. Environment variables
    ///
    /// Most callers should use [`get_config`], which loads once and caches.
    /// This function is public so tests can exercise source precedence.
    pub fn load() -> AmuletResult<Self> {
        let builder = Config::builder()
            // Start with defaults
            .set_default("server.host", "127.0.0.1")
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_default("server.port", 8080)
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_default("database.db_type", "sqlite")
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_default("database.sqlite_url", "sqlite://amulet.db?mode=rwc")
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_default("database.postgres_url", "postgres://localhost/amulet")
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_default("admin.username", "admin")
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_default("admin.password", "admin")
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_default("license.key_prefix", "AMU")
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_default("license.key_segments", 4)
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_default("license.key_segment_length", 4)
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_default("logging.level", "info")
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            // Load from config.toml (optional)
            .add_source(config::File::with_name("config").required(false))
            // Override with environment variables
            .set_override_option("server.host", env::var("AMULET_SERVER_HOST").ok())
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_override_option(
                "server.port",
                env::var("AMULET_SERVER_PORT")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok()),
            )
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_override_option("database.db_type", env::var("AMULET_DATABASE_TYPE").ok())
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_override_option(
                "database.sqlite_url",
                env::var("AMULET_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("sqlite")),
            )
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_override_option(
                "database.postgres_url",
                env::var("AMULET_DATABASE_URL")
                    .ok()
                    .filter(|url| url.starts_with("postgres")),
            )
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_override_option("admin.username", env::var("AMULET_ADMIN_USER").ok())
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_override_option("admin.password", env::var("AMULET_ADMIN_PASS").ok())
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_override_option(
                "license.key_prefix",
                env::var("AMULET_LICENSE_KEY_PREFIX").ok(),
            )
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?
            .set_override_option("logging.level", env::var("AMULET_LOG_LEVEL").ok())
            .map_err(|e| AmuletError::ConfigError(e.to_string()))?;

        let settings = builder
            .build()
            .map_err(|e| AmuletError::ConfigError(format!("failed to build config: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| AmuletError::ConfigError(format!("failed to deserialize config: {e}")))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> AmuletResult<()> {
        if self.server.port == 0 {
            return Err(AmuletError::ConfigError(
                "server.port must be greater than 0".to_string(),
            ));
        }

        match self.database.db_type.as_str() {
            "sqlite" | "postgres" => {}
            other => {
                return Err(AmuletError::ConfigError(format!(
                    "database.db_type must be 'sqlite' or 'postgres', got '{other}'"
                )));
            }
        }

        if self.admin.username.is_empty() || self.admin.password.is_empty() {
            return Err(AmuletError::ConfigError(
                "admin.username and admin.password must not be empty".to_string(),
            ));
        }

        if self.license.key_prefix.is_empty() {
            return Err(AmuletError::ConfigError(
                "license.key_prefix cannot be empty".to_string(),
            ));
        }
        if self.license.key_segments == 0 || self.license.key_segment_length == 0 {
            return Err(AmuletError::ConfigError(
                "license.key_segments and license.key_segment_length must be greater than 0"
                    .to_string(),
            ));
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(AmuletError::ConfigError(format!(
                    "logging.level must be one of: trace, debug, info, warn, error. Got '{other}'"
                )));
            }
        }

        Ok(())
    }
}

/// Get the global configuration.
///
/// This loads the configuration on first access and caches it.
/// Returns an error if configuration loading or validation fails.
pub fn get_config() -> AmuletResult<&'static AmuletConfig> {
    if let Some(config) = CONFIG.get() {
        return Ok(config);
    }

    let config = AmuletConfig::load()?;
    config.validate()?;

    // Another thread may have beaten us to it; either copy is equivalent.
    let _ = CONFIG.set(config.clone());

    Ok(CONFIG.get().expect("config was just set"))
}

/// Initialize configuration explicitly.
///
/// Call this early in the server entry point to catch configuration errors.
pub fn init_config() -> AmuletResult<&'static AmuletConfig> {
    get_config()
}
