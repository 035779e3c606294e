use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub consumer: ConsumerConfig,
    pub partner: PartnerConfig,
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Topic carrying expense-approved events
    pub topic: String,
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    /// Fixed delay between attempts, in seconds
    pub backoff_secs: u64,
    /// Deadline for a single handler attempt, in seconds
    pub max_execute_secs: u64,
}

impl ConsumerConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_secs(self.backoff_secs)
    }

    pub fn max_execute(&self) -> Duration {
        Duration::from_secs(self.max_execute_secs)
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: "expense-approved".to_string(),
            max_retries: 3,
            backoff_secs: 2,
            max_execute_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PartnerConfig {
    /// Base URL of the settlement partner API
    pub base_url: String,
    /// Request timeout in seconds
    #[serde(default = "default_partner_timeout")]
    pub timeout_secs: u64,
}

fn default_partner_timeout() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct SettlementConfig {
    /// TTL for the per-expense settlement lock, in seconds. Must be sized
    /// comfortably above the expected partner-call latency so a live
    /// attempt's lock cannot expire while still in flight.
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,
}

fn default_lock_ttl() -> u64 {
    60
}

impl SettlementConfig {
    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.url", "postgres://localhost/expensed")?
            .set_default("database.max_connections", 5)?
            .set_default("consumer.topic", "expense-approved")?
            .set_default("consumer.max_retries", 3)?
            .set_default("consumer.backoff_secs", 2)?
            .set_default("consumer.max_execute_secs", 10)?
            .set_default("partner.base_url", "http://localhost:9999")?
            .set_default("partner.timeout_secs", 10)?
            .set_default("settlement.lock_ttl_secs", 60)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("EXPENSED_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (EXPENSED_DATABASE__URL, etc.)
            .add_source(
                Environment::with_prefix("EXPENSED")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.database.url.is_empty() {
            errors.push("database.url must not be empty".to_string());
        }
        if self.consumer.topic.is_empty() {
            errors.push("consumer.topic must not be empty".to_string());
        }
        if self.consumer.max_execute_secs == 0 {
            errors.push("consumer.max_execute_secs must be positive".to_string());
        }
        if self.partner.base_url.is_empty() {
            errors.push("partner.base_url must not be empty".to_string());
        }
        if self.settlement.lock_ttl_secs == 0 {
            errors.push("settlement.lock_ttl_secs must be positive".to_string());
        }
        if self.settlement.lock_ttl_secs <= self.consumer.max_execute_secs {
            errors.push(
                "settlement.lock_ttl_secs should exceed consumer.max_execute_secs".to_string(),
            );
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
