use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,

    pub worker_poll_seconds: u64,
    pub worker_batch_size: i64,
    pub worker_lock_lease_seconds: i64,
    pub max_concurrent_runs: usize,

    pub puzzlebot_base_url: String,
    pub http_timeout_seconds: u64,
    pub http_retries: u32,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(v) => v
            .parse()
            .with_context(|| format!("{name} must be a valid value")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            port: env_or("PORT", 8080)?,

            worker_poll_seconds: env_or("WORKER_POLL_SECONDS", 30)?,
            worker_batch_size: env_or("WORKER_BATCH_SIZE", 200)?,
            worker_lock_lease_seconds: env_or("WORKER_LOCK_LEASE_SECONDS", 120)?,
            max_concurrent_runs: env_or("MAX_CONCURRENT_RUNS", 100)?,

            puzzlebot_base_url: env::var("PUZZLEBOT_BASE_URL")
                .unwrap_or_else(|_| "https://api.puzzlebot.top/".to_string()),
            http_timeout_seconds: env_or("HTTP_TIMEOUT_SECONDS", 20)?,
            http_retries: env_or("HTTP_RETRIES", 2)?,
        })
    }
}
