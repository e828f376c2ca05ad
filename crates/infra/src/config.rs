//! Process configuration, read once from the environment at startup.

use std::time::Duration;

use mlq_core::{DEFAULT_JOB_TIMEOUT, DEFAULT_MAX_RETRIES};

use crate::blob::DEFAULT_BLOB_TIMEOUT;
use crate::jobs::DEFAULT_LEASE_TIMEOUT;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Base of presigned URLs handed to clients and workers.
    pub public_url: String,
    pub redis_url: Option<String>,
    pub queue_name: String,
    pub max_retries: u32,
    pub job_timeout: Duration,
    pub lease_timeout: Duration,
    pub presign_ttl: Duration,
    /// Whole-request budget of one blob transfer made over HTTP.
    pub blob_timeout: Duration,
    pub workers: usize,
    pub simulated_fault_rate: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            public_url: "http://localhost:8080".to_string(),
            redis_url: None,
            queue_name: "default".to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            job_timeout: DEFAULT_JOB_TIMEOUT,
            lease_timeout: DEFAULT_LEASE_TIMEOUT,
            presign_ttl: Duration::from_secs(3600),
            blob_timeout: DEFAULT_BLOB_TIMEOUT,
            workers: 2,
            simulated_fault_rate: 0.0,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep their
    /// defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Config::default();

        if let Some(host) = lookup("SERVER_HOST") {
            config.host = host;
        }
        if let Some(port) = lookup("SERVER_PORT") {
            config.port = parse_number("SERVER_PORT", &port)?;
        }
        config.public_url = match lookup("PUBLIC_URL") {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("http://localhost:{}", config.port),
        };
        config.redis_url = lookup("REDIS_URL").filter(|url| !url.is_empty());
        if let Some(name) = lookup("QUEUE_NAME") {
            config.queue_name = name;
        }
        if let Some(retries) = lookup("MAX_RETRIES") {
            config.max_retries = parse_number("MAX_RETRIES", &retries)?;
        }
        if let Some(timeout) = lookup("JOB_TIMEOUT") {
            config.job_timeout = parse_duration_var("JOB_TIMEOUT", &timeout)?;
        }
        if let Some(lease) = lookup("LEASE_TIMEOUT") {
            config.lease_timeout = parse_duration_var("LEASE_TIMEOUT", &lease)?;
        }
        if let Some(ttl) = lookup("PRESIGN_TTL") {
            config.presign_ttl = parse_duration_var("PRESIGN_TTL", &ttl)?;
        }
        if let Some(timeout) = lookup("BLOB_TIMEOUT") {
            config.blob_timeout = parse_duration_var("BLOB_TIMEOUT", &timeout)?;
        }
        if let Some(workers) = lookup("WORKERS") {
            config.workers = parse_number("WORKERS", &workers)?;
        }
        if let Some(rate) = lookup("SIMULATED_FAULT_RATE") {
            let parsed: f64 = parse_number("SIMULATED_FAULT_RATE", &rate)?;
            if !(0.0..=1.0).contains(&parsed) {
                return Err(invalid("SIMULATED_FAULT_RATE", &rate, "must be within 0..=1"));
            }
            config.simulated_fault_rate = parsed;
        }
        if config.lease_timeout.is_zero() {
            return Err(invalid("LEASE_TIMEOUT", "0", "must be positive"));
        }
        if config.blob_timeout.is_zero() {
            return Err(invalid("BLOB_TIMEOUT", "0", "must be positive"));
        }

        Ok(config)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn invalid(var: &'static str, value: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value: value.to_string(),
        reason: reason.into(),
    }
}

fn parse_number<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| invalid(var, value, e.to_string()))
}

fn parse_duration_var(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| invalid(var, value, "expected <n>s, <n>m, <n>h or seconds"))
}

/// Parse `"600s"`, `"10m"`, `"1h"` or bare seconds (`"600"`).
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (digits, unit) = match value.char_indices().find(|(_, c)| !c.is_ascii_digit()) {
        Some((idx, _)) => value.split_at(idx),
        None => (value, "s"),
    };
    let n: u64 = digits.parse().ok()?;
    let secs = match unit {
        "s" => n,
        "m" => n.checked_mul(60)?,
        "h" => n.checked_mul(3600)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}
