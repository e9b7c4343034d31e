//! Typed configuration from environment variables.
//!
//! Loads once at startup and fails fast on malformed values. Every
//! variable is optional; defaults suit a local simulation run.

use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};

pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 25;
pub const DEFAULT_MAILBOX_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Number of polling workers to run.
    pub workers: usize,
    /// How long an idle worker waits before polling again.
    #[serde(with = "millis")]
    pub poll_interval: Duration,
    /// Bound on commands buffered in front of the dispatcher.
    pub mailbox_capacity: usize,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            otel_endpoint: None,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            workers: positive_var(&lookup, "KEYQ_WORKERS")?.unwrap_or(defaults.workers),
            poll_interval: positive_var(&lookup, "KEYQ_POLL_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            mailbox_capacity: positive_var(&lookup, "KEYQ_MAILBOX_CAPACITY")?
                .unwrap_or(defaults.mailbox_capacity),
            otel_endpoint: lookup("OTEL_ENDPOINT").filter(|v| !v.is_empty()),
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

/// Parse an optional variable that must be a positive integer when set.
fn positive_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr + PartialEq + Default,
{
    let Some(raw) = lookup(name) else {
        return Ok(None);
    };
    match raw.trim().parse::<T>() {
        Ok(value) if value != T::default() => Ok(Some(value)),
        Ok(_) => Err(Error::Config(format!("{name} must be greater than zero"))),
        Err(_) => Err(Error::Config(format!(
            "{name} must be a positive integer, got {raw:?}"
        ))),
    }
}

mod millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }
}
