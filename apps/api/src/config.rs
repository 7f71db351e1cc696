use anyhow::{Context, Result};
use chrono_tz::Tz;

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub port: u16,
    pub rust_log: String,
    pub scheduler_enabled: bool,
    pub scheduler_poll_secs: u64,
    pub vendor_timeout_secs: u64,
    pub source_timeout_secs: u64,
    /// Used for budgets of agents that have no schedule row yet.
    pub default_timezone: Tz,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 10)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            scheduler_enabled: parse_env("SCHEDULER_ENABLED", true)?,
            scheduler_poll_secs: parse_env("SCHEDULER_POLL_SECS", 60)?,
            vendor_timeout_secs: parse_env("VENDOR_TIMEOUT_SECS", 30)?,
            source_timeout_secs: parse_env("SOURCE_TIMEOUT_SECS", 30)?,
            default_timezone: parse_env("DEFAULT_TIMEZONE", chrono_tz::Asia::Kolkata)?,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{key} is invalid ('{raw}'): {e}")),
        Err(_) => Ok(default),
    }
}
