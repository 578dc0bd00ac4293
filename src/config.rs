// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Configuration for the ingestion gateway.
//!
//! Defaults allow one notification per object and severity every five
//! minutes, and give each listener five seconds to drain on shutdown.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors raised while reading the environment.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

/// Configuration for the gateway binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Event server listener
    #[serde(default = "default_event_listener")]
    pub event: ListenerConfig,

    /// Webhook receiver listener
    #[serde(default = "default_receiver_listener")]
    pub receiver: ListenerConfig,

    /// Admission control configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Largest event or webhook body accepted (default: 3 MiB)
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Log output format, `json` or `text` (default: json)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Per-listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Bind address
    pub bind_addr: String,

    /// Drain window after a stop signal in milliseconds (default: 5000)
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Fixed-window admission control configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests admitted per key per window (default: 1)
    #[serde(default = "default_tokens")]
    pub tokens: u64,

    /// Window length in seconds (default: 300)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// How often expired counters are swept, in seconds (default: 60)
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
}

fn default_event_listener() -> ListenerConfig {
    ListenerConfig::new("0.0.0.0:9090")
}

fn default_receiver_listener() -> ListenerConfig {
    ListenerConfig::new("0.0.0.0:9292")
}

fn default_shutdown_grace_ms() -> u64 {
    5000
}

fn default_tokens() -> u64 {
    1
}

fn default_interval_secs() -> u64 {
    300
}

fn default_sweep_secs() -> u64 {
    60
}

fn default_max_body_bytes() -> usize {
    3 * 1024 * 1024
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            event: default_event_listener(),
            receiver: default_receiver_listener(),
            rate_limit: RateLimitConfig::default(),
            max_body_bytes: default_max_body_bytes(),
            log_format: default_log_format(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tokens: default_tokens(),
            interval_secs: default_interval_secs(),
            sweep_interval_secs: default_sweep_secs(),
        }
    }
}

impl ListenerConfig {
    /// Listener on `bind_addr` with the default grace period.
    pub fn new(bind_addr: impl Into<String>) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }

    /// Get the shutdown grace period
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl RateLimitConfig {
    /// Get the window duration
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Get the sweep interval
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Config {
    /// Load configuration from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        if let Some(addr) = lookup("EVENTS_ADDR") {
            config.event.bind_addr = addr;
        }
        if let Some(addr) = lookup("RECEIVER_ADDR") {
            config.receiver.bind_addr = addr;
        }
        if let Some(grace) = parse_var(&lookup, "SHUTDOWN_GRACE_MS")? {
            config.event.shutdown_grace_ms = grace;
            config.receiver.shutdown_grace_ms = grace;
        }
        if let Some(tokens) = parse_var(&lookup, "RATE_LIMIT_TOKENS")? {
            config.rate_limit.tokens = tokens;
        }
        if let Some(secs) = parse_var(&lookup, "RATE_LIMIT_INTERVAL_SECS")? {
            config.rate_limit.interval_secs = secs;
        }
        if let Some(secs) = parse_var(&lookup, "RATE_LIMIT_SWEEP_SECS")? {
            config.rate_limit.sweep_interval_secs = secs;
        }
        if let Some(bytes) = parse_var(&lookup, "MAX_BODY_BYTES")? {
            config.max_body_bytes = bytes;
        }
        if let Some(format) = lookup("LOG_FORMAT") {
            config.log_format = format.to_lowercase();
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make admission control meaningless.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_limit.tokens == 0 {
            return Err(ConfigError::Zero {
                var: "RATE_LIMIT_TOKENS",
            });
        }
        if self.rate_limit.interval_secs == 0 {
            return Err(ConfigError::Zero {
                var: "RATE_LIMIT_INTERVAL_SECS",
            });
        }
        if self.rate_limit.sweep_interval_secs == 0 {
            return Err(ConfigError::Zero {
                var: "RATE_LIMIT_SWEEP_SECS",
            });
        }
        Ok(())
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value }),
    }
}
