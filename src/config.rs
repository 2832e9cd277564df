//! Application Configuration
//!
//! All runtime configuration comes from environment variables (loaded from
//! `.env` in development via dotenvy). Invalid configuration is a startup
//! failure, never a runtime surprise.

use rust_decimal::Decimal;
use std::str::FromStr;
use std::time::Duration;

/// Configuration load/validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value} ({reason})")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: String,
    pub port: u16,

    /// Postgres connection string
    pub database_url: String,
    /// Redis connection string (cache, bus, and market locks)
    pub redis_url: String,

    /// Unique id of this instance in the fleet, used as lock owner token
    /// and stamped onto appended events.
    pub server_id: String,

    /// Flat platform fee rate applied to each trade's total, split equally
    /// between buyer and seller.
    pub platform_fee_rate: Decimal,

    /// Market lock lease duration.
    pub lock_ttl: Duration,
    /// Market lock heartbeat interval (must be well below the TTL).
    pub lock_renew_interval: Duration,

    /// Capacity of each market's command queue. When full, submissions
    /// get `TryAgain` instead of blocking.
    pub engine_queue_capacity: usize,
    /// Deadline for a command to clear the engine, wallet, and log.
    pub command_timeout: Duration,

    /// Days of order events kept before the retention sweep deletes them.
    pub event_retention_days: i64,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let environment = env_or("APP_ENV", "development");
        let port = parse_env("PORT", "8080")?;

        let database_url = require_env("DATABASE_URL")?;
        let redis_url = env_or("REDIS_URL", "redis://127.0.0.1:6379");

        let server_id = match std::env::var("SERVER_ID") {
            Ok(v) if !v.is_empty() => v,
            _ => format!("exchange-{}", uuid::Uuid::new_v4().simple()),
        };

        let platform_fee_rate = parse_env::<Decimal>("PLATFORM_FEE_RATE", "0.02")?;
        if platform_fee_rate < Decimal::ZERO || platform_fee_rate >= Decimal::ONE {
            return Err(ConfigError::Invalid {
                name: "PLATFORM_FEE_RATE",
                value: platform_fee_rate.to_string(),
                reason: "must be in [0, 1)".to_string(),
            });
        }

        let lock_ttl_secs: u64 = parse_env("MARKET_LOCK_TTL_SECS", "30")?;
        let lock_renew_secs: u64 = parse_env("MARKET_LOCK_RENEW_SECS", "10")?;
        if lock_renew_secs >= lock_ttl_secs {
            return Err(ConfigError::Invalid {
                name: "MARKET_LOCK_RENEW_SECS",
                value: lock_renew_secs.to_string(),
                reason: format!("must be below MARKET_LOCK_TTL_SECS ({lock_ttl_secs})"),
            });
        }

        let engine_queue_capacity: usize = parse_env("ENGINE_QUEUE_CAPACITY", "1024")?;
        if engine_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                name: "ENGINE_QUEUE_CAPACITY",
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let command_timeout_secs: u64 = parse_env("COMMAND_TIMEOUT_SECS", "30")?;
        let event_retention_days: i64 = parse_env("EVENT_RETENTION_DAYS", "7")?;

        Ok(Self {
            environment,
            port,
            database_url,
            redis_url,
            server_id,
            platform_fee_rate,
            lock_ttl: Duration::from_secs(lock_ttl_secs),
            lock_renew_interval: Duration::from_secs(lock_renew_secs),
            engine_queue_capacity,
            command_timeout: Duration::from_secs(command_timeout_secs),
            event_retention_days,
        })
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn env_or(name: &'static str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn require_env(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_env<T: FromStr>(name: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    let raw = env_or(name, default);
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: raw,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fee_rate_default_parses() {
        let rate: Decimal = "0.02".parse().unwrap();
        assert_eq!(rate, Decimal::new(2, 2));
    }

    #[test]
    fn test_parse_env_falls_back_to_default() {
        std::env::remove_var("THIS_IS_NOT_SET");
        let v: u64 = parse_env("THIS_IS_NOT_SET", "42").unwrap();
        assert_eq!(v, 42);
    }
}
