//! Service configuration.

use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

use simplebank_common::{BankError, Result};

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Database URL.
    pub url: String,
    /// Maximum pooled connections.
    pub max_connections: u32,
    /// Time to wait for a pooled connection.
    pub acquire_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/simple_bank".to_string(),
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

/// Row lock configuration.
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How long a transaction waits for a row lock before giving up with a
    /// conflict.
    pub lock_timeout: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Conflict retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Backoff before the first retry.
    pub base_backoff: Duration,
    /// Upper bound for any single backoff.
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(500),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = BankError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(BankError::ConfigurationError(format!(
                "Unknown log format: {}",
                other
            ))),
        }
    }
}

/// Main service configuration.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Lock configuration.
    pub lock_config: LockConfig,
    /// Retry configuration.
    pub retry_config: RetryConfig,
    /// Log level.
    pub log_level: String,
    /// Log format.
    pub log_format: LogFormat,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            lock_config: LockConfig::default(),
            retry_config: RetryConfig::default(),
            log_level: "info".to_string(),
            log_format: LogFormat::Json,
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.database.url = url;
        }

        if let Some(max) = lookup("SIMPLEBANK_MAX_CONNECTIONS").and_then(|v| v.parse().ok()) {
            config.database.max_connections = max;
        }

        if let Some(ms) = lookup("SIMPLEBANK_LOCK_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            config.lock_config.lock_timeout = Duration::from_millis(ms);
        }

        if let Some(attempts) =
            lookup("SIMPLEBANK_RETRY_MAX_ATTEMPTS").and_then(|v| v.parse().ok())
        {
            config.retry_config.max_attempts = attempts;
        }

        if let Some(ms) = lookup("SIMPLEBANK_RETRY_BASE_MS").and_then(|v| v.parse().ok()) {
            config.retry_config.base_backoff = Duration::from_millis(ms);
        }

        if let Some(level) = lookup("LOG_LEVEL") {
            config.log_level = level;
        }

        if let Some(format) = lookup("LOG_FORMAT").and_then(|v| v.parse().ok()) {
            config.log_format = format;
        }

        config
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.database.url.is_empty() {
            return Err(config_error("Database URL cannot be empty"));
        }

        if self.database.max_connections == 0 {
            return Err(config_error("Max connections must be at least 1"));
        }

        if self.lock_config.lock_timeout < Duration::from_millis(1) {
            return Err(config_error("Lock timeout must be at least 1ms"));
        }

        if self.retry_config.max_attempts == 0 {
            return Err(config_error("Retry max attempts must be at least 1"));
        }

        if self.retry_config.base_backoff > self.retry_config.max_backoff {
            return Err(config_error("Base backoff cannot exceed max backoff"));
        }

        Ok(())
    }

    /// Open the PostgreSQL connection pool.
    pub async fn connect_pool(&self) -> Result<PgPool> {
        let pool = PgPoolOptions::new()
            .max_connections(self.database.max_connections)
            .acquire_timeout(self.database.acquire_timeout)
            .connect(&self.database.url)
            .await
            .map_err(|e| BankError::storage("connecting to database", e.to_string()))?;

        info!(
            max_connections = self.database.max_connections,
            "Database pool ready"
        );
        Ok(pool)
    }
}

fn config_error(message: &str) -> BankError {
    BankError::ConfigurationError(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServiceConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_config() {
        let mut config = ServiceConfig::default();
        config.lock_config.lock_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = ServiceConfig::default();
        config.lock_config.lock_timeout = Duration::from_micros(900);
        assert!(config.validate().is_err());
        config.lock_config.lock_timeout = Duration::from_millis(1);
        assert!(config.validate().is_ok());

        let mut config = ServiceConfig::default();
        config.retry_config.base_backoff = Duration::from_secs(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://db/bank"),
            ("SIMPLEBANK_LOCK_TIMEOUT_MS", "250"),
            ("SIMPLEBANK_RETRY_MAX_ATTEMPTS", "7"),
            ("LOG_FORMAT", "pretty"),
        ]));

        assert_eq!(config.database.url, "postgres://db/bank");
        assert_eq!(config.lock_config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.retry_config.max_attempts, 7);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_unparsable_env_keeps_default() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("SIMPLEBANK_MAX_CONNECTIONS", "lots"),
            ("LOG_FORMAT", "xml"),
        ]));

        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
