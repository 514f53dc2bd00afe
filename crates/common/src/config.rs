//! Application configuration.

use serde::Deserialize;
use std::path::Path;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Redis configuration.
    pub redis: RedisConfig,
    /// Email channel configuration.
    #[serde(default)]
    pub email: Option<EmailConfig>,
    /// Periodic job scheduler configuration.
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

/// Database connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL.
    pub url: String,
    /// Key prefix for all Redis channels.
    #[serde(default = "default_redis_prefix")]
    pub prefix: String,
}

/// Email channel configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Provider name: "smtp", "sendgrid" or "mailgun".
    pub provider: String,
    /// From address.
    pub from_address: String,
    /// From display name.
    pub from_name: String,
    /// SMTP host (smtp provider).
    #[serde(default)]
    pub smtp_host: Option<String>,
    /// SMTP port (smtp provider).
    #[serde(default)]
    pub smtp_port: Option<u16>,
    /// SMTP username (smtp provider).
    #[serde(default)]
    pub smtp_username: Option<String>,
    /// SMTP password (smtp provider).
    #[serde(default)]
    pub smtp_password: Option<String>,
    /// API key (sendgrid/mailgun providers).
    #[serde(default)]
    pub api_key: Option<String>,
    /// Mailgun sending domain.
    #[serde(default)]
    pub domain: Option<String>,
}

/// Scheduler configuration section.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Whether periodic jobs run at all. Disabled in test environments.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// IANA timezone for daily wall-clock firing times.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: true,
            timezone: default_timezone(),
        }
    }
}

const fn default_max_connections() -> u32 {
    100
}

const fn default_min_connections() -> u32 {
    5
}

fn default_redis_prefix() -> String {
    "atcloud".to_string()
}

fn default_timezone() -> String {
    "UTC".to_string()
}

const fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from files and environment variables.
    ///
    /// Configuration is loaded in the following order:
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (based on `ATCLOUD_ENV`)
    /// 3. Environment variables with `ATCLOUD_` prefix
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = std::env::var("ATCLOUD_ENV").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{env}")).required(false))
            .add_source(
                config::Environment::with_prefix("ATCLOUD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load configuration from a specific file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix("ATCLOUD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
