//! Configuration module
//!
//! Environment-driven settings for the Postgres registry, the queue drainer and
//! conflict retries. `.env` files are honored via `dotenvy`.

use std::env;

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const DRAIN_POLL_INTERVAL_MS: u64 = 1000;
const DRAIN_MAX_CONCURRENT_UNITS: usize = 8;
const CONFLICT_MAX_RETRIES: u32 = 5;

/// Database connection settings
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
}

/// Queue drainer settings
#[derive(Clone, Debug)]
pub struct DrainConfig {
    pub poll_interval_ms: u64,
    pub max_concurrent_units: usize,
}

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub database: DatabaseConfig,
    pub drain: DrainConfig,
    pub conflict_max_retries: u32,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let config = Config {
            database: DatabaseConfig {
                database_url: env::var("GATEKEEP_DATABASE_URL")
                    .or_else(|_| env::var("DATABASE_URL"))
                    .ok(),
                db_max_connections: env_or("DB_MAX_CONNECTIONS", MAX_CONNECTIONS),
                db_timeout_seconds: env_or("DB_TIMEOUT_SECONDS", CONNECTION_TIMEOUT_SECS),
            },
            drain: DrainConfig {
                poll_interval_ms: env_or("DRAIN_POLL_INTERVAL_MS", DRAIN_POLL_INTERVAL_MS),
                max_concurrent_units: env_or(
                    "DRAIN_MAX_CONCURRENT_UNITS",
                    DRAIN_MAX_CONCURRENT_UNITS,
                ),
            },
            conflict_max_retries: env_or("CONFLICT_MAX_RETRIES", CONFLICT_MAX_RETRIES),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.database.db_max_connections == 0 {
            return Err(anyhow::anyhow!("DB_MAX_CONNECTIONS must be greater than 0"));
        }
        if self.drain.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!(
                "DRAIN_POLL_INTERVAL_MS must be greater than 0"
            ));
        }
        if self.drain.max_concurrent_units == 0 {
            return Err(anyhow::anyhow!(
                "DRAIN_MAX_CONCURRENT_UNITS must be greater than 0"
            ));
        }
        Ok(())
    }

}

impl DatabaseConfig {
    /// The database URL, required by anything that talks to Postgres.
    pub fn url(&self) -> Result<&str, anyhow::Error> {
        self.database_url
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("GATEKEEP_DATABASE_URL or DATABASE_URL must be set"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                database_url: None,
                db_max_connections: MAX_CONNECTIONS,
                db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            },
            drain: DrainConfig {
                poll_interval_ms: DRAIN_POLL_INTERVAL_MS,
                max_concurrent_units: DRAIN_MAX_CONCURRENT_UNITS,
            },
            conflict_max_retries: CONFLICT_MAX_RETRIES,
        }
    }
}
