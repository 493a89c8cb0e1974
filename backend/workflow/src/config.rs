//! Application configuration loaded from environment variables.

use std::time::Duration;

use crate::errors::{Result, WorkflowError};

/// How the verifier rotation cursor is shared between projects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationScope {
    /// One cursor for every project and candidate pool.
    Global,
    /// One cursor per distinct set of project departments.
    Department,
}

impl RotationScope {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "global" => Ok(Self::Global),
            "department" => Ok(Self::Department),
            other => Err(WorkflowError::Config(format!(
                "Invalid ROTATION_SCOPE: {other} (expected `global` or `department`)"
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Size of the SQLite connection pool
    pub db_max_connections: u32,
    /// How often (in seconds) the worker polls the task event outbox
    pub poll_interval_secs: u64,
    /// Maximum number of outbox events replayed per poll
    pub outbox_batch_size: u32,
    /// Upper bound on active staff loaded for verifier selection
    pub staff_fetch_limit: u32,
    /// Verification tasks are due this many days after creation
    pub verification_due_days: i64,
    /// Deadline for a single notification dispatch
    pub notify_timeout: Duration,
    /// Deadline for a single store lookup
    pub store_timeout: Duration,
    pub rotation_scope: RotationScope,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_url: "sqlite:./workflow.db".to_string(),
            db_max_connections: 5,
            poll_interval_secs: 5,
            outbox_batch_size: 100,
            staff_fetch_limit: 200,
            verification_due_days: 7,
            notify_timeout: Duration::from_millis(2_000),
            store_timeout: Duration::from_secs(10),
            rotation_scope: RotationScope::Global,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();
        Ok(Config {
            database_url: env_var("DATABASE_URL").unwrap_or(defaults.database_url),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            poll_interval_secs: parse_or("POLL_INTERVAL_SECS", defaults.poll_interval_secs)?,
            outbox_batch_size: parse_or("OUTBOX_BATCH_SIZE", defaults.outbox_batch_size)?,
            staff_fetch_limit: parse_or("STAFF_FETCH_LIMIT", defaults.staff_fetch_limit)?,
            verification_due_days: parse_or(
                "VERIFICATION_DUE_DAYS",
                defaults.verification_due_days,
            )?,
            notify_timeout: Duration::from_millis(parse_or("NOTIFY_TIMEOUT_MS", 2_000u64)?),
            store_timeout: Duration::from_secs(parse_or("STORE_TIMEOUT_SECS", 10u64)?),
            rotation_scope: match env_var("ROTATION_SCOPE") {
                Ok(raw) => RotationScope::parse(&raw)?,
                Err(_) => defaults.rotation_scope,
            },
        })
    }
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| WorkflowError::Config(format!("Invalid {key}"))),
        Err(_) => Ok(default),
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| WorkflowError::Config(format!("Missing env var: {key}")))
}
