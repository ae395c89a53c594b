//! Configuration types mapping to the TOML schema.
//!
//! The client config is a single flat table:
//! ```toml
//! base_url = "http://127.0.0.1:4096"
//! default_timeout_secs = 30
//! message_timeout_secs = 300
//!
//! enable_retry = true
//! max_retry_attempts = 3
//! retry_delay_seconds = 2.0
//! max_retry_jitter_secs = 1.0
//!
//! enable_circuit_breaker = true
//! circuit_breaker_threshold = 5
//! circuit_breaker_duration_secs = 30
//!
//! enable_operation_timeout = true
//! operation_timeout_secs = 30
//! ```
//!
//! Durations are (fractional) seconds; `operation_timeout_secs = 0.5` is half
//! a second.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, Result};

/// Default server address (the server's own default listen port).
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:4096";

/// Environment variable overriding [`ClientConfig::base_url`].
pub const ENV_BASE_URL: &str = "OPENCODE_BASE_URL";
/// Environment variable overriding [`ClientConfig::default_timeout_secs`].
pub const ENV_TIMEOUT: &str = "OPENCODE_TIMEOUT_SECS";
/// Environment variable overriding [`ClientConfig::message_timeout_secs`].
pub const ENV_MESSAGE_TIMEOUT: &str = "OPENCODE_MESSAGE_TIMEOUT_SECS";
/// Environment variable overriding [`ClientConfig::max_retry_attempts`].
pub const ENV_MAX_RETRY_ATTEMPTS: &str = "OPENCODE_MAX_RETRY_ATTEMPTS";
/// Environment variable that disables retries when set to a truthy value.
pub const ENV_DISABLE_RETRY: &str = "OPENCODE_DISABLE_RETRY";
/// Environment variable that disables the circuit breaker when set to a truthy value.
pub const ENV_DISABLE_CIRCUIT_BREAKER: &str = "OPENCODE_DISABLE_CIRCUIT_BREAKER";

// ─────────────────────────────────────────────────────────────────────────────
// Client Config
// ─────────────────────────────────────────────────────────────────────────────

/// Root client configuration.
///
/// All keys are optional so that partial files load cleanly; anything not
/// present keeps its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the server.
    pub base_url: String,

    /// Whole-request deadline for quick metadata operations, in seconds.
    pub default_timeout_secs: f64,

    /// Whole-request deadline for operations that run AI generation, in seconds.
    pub message_timeout_secs: f64,

    /// Whether transient failures are retried.
    pub enable_retry: bool,

    /// Number of retries after the first attempt. Zero disables retrying.
    pub max_retry_attempts: u32,

    /// Base delay for exponential backoff, in (fractional) seconds.
    pub retry_delay_seconds: f64,

    /// Upper bound of the uniform random jitter added to each backoff, in seconds.
    pub max_retry_jitter_secs: f64,

    /// Whether the circuit breaker guards outbound calls.
    pub enable_circuit_breaker: bool,

    /// Consecutive transient failures that open the circuit.
    pub circuit_breaker_threshold: u32,

    /// How long the circuit stays open before admitting a probe, in seconds.
    pub circuit_breaker_duration_secs: f64,

    /// Whether each attempt is bounded by [`Self::operation_timeout_secs`].
    pub enable_operation_timeout: bool,

    /// Per-attempt deadline applied by the timeout policy, in seconds.
    pub operation_timeout_secs: f64,

    /// Custom user agent (defaults to `opencode-client/<version>`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            default_timeout_secs: 30.0,
            message_timeout_secs: 300.0,
            enable_retry: true,
            max_retry_attempts: 3,
            retry_delay_seconds: 2.0,
            max_retry_jitter_secs: 1.0,
            enable_circuit_breaker: true,
            circuit_breaker_threshold: 5,
            circuit_breaker_duration_secs: 30.0,
            enable_operation_timeout: true,
            operation_timeout_secs: 30.0,
            user_agent: None,
        }
    }
}

impl ClientConfig {
    /// Create a config with all defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a default config pointing at a specific server.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }

    /// Parse from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Serialize to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check every field against its allowed range.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::invalid("base_url", "must not be empty"));
        }
        positive("default_timeout_secs", self.default_timeout_secs)?;
        positive("message_timeout_secs", self.message_timeout_secs)?;
        non_negative("retry_delay_seconds", self.retry_delay_seconds)?;
        non_negative("max_retry_jitter_secs", self.max_retry_jitter_secs)?;
        if self.circuit_breaker_threshold == 0 {
            return Err(ConfigError::invalid("circuit_breaker_threshold", "must be >= 1"));
        }
        positive("circuit_breaker_duration_secs", self.circuit_breaker_duration_secs)?;
        positive("operation_timeout_secs", self.operation_timeout_secs)?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|var| std::env::var(var).ok())
    }

    /// Apply overrides using an arbitrary variable lookup.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            self.base_url = url;
        }
        if let Some(value) = lookup(ENV_TIMEOUT) {
            self.default_timeout_secs = parse_env(ENV_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_MESSAGE_TIMEOUT) {
            self.message_timeout_secs = parse_env(ENV_MESSAGE_TIMEOUT, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_RETRY_ATTEMPTS) {
            self.max_retry_attempts = parse_env(ENV_MAX_RETRY_ATTEMPTS, &value)?;
        }
        if let Some(value) = lookup(ENV_DISABLE_RETRY)
            && parse_flag(ENV_DISABLE_RETRY, &value)?
        {
            self.enable_retry = false;
        }
        if let Some(value) = lookup(ENV_DISABLE_CIRCUIT_BREAKER)
            && parse_flag(ENV_DISABLE_CIRCUIT_BREAKER, &value)?
        {
            self.enable_circuit_breaker = false;
        }
        Ok(())
    }

    /// Deadline for quick metadata operations.
    pub fn default_timeout(&self) -> Duration {
        secs(self.default_timeout_secs)
    }

    /// Deadline for operations expected to invoke AI generation.
    pub fn message_timeout(&self) -> Duration {
        secs(self.message_timeout_secs)
    }

    /// Base delay of the exponential backoff.
    ///
    /// Invalid (negative or non-finite) values collapse to zero; use
    /// [`Self::validate`] to reject them up front. The same holds for every
    /// duration accessor.
    pub fn retry_base_delay(&self) -> Duration {
        secs(self.retry_delay_seconds)
    }

    /// Maximum random jitter added to each backoff delay.
    pub fn max_retry_jitter(&self) -> Duration {
        secs(self.max_retry_jitter_secs)
    }

    /// How long an opened circuit rejects calls.
    pub fn circuit_breaker_duration(&self) -> Duration {
        secs(self.circuit_breaker_duration_secs)
    }

    /// Per-attempt deadline of the timeout policy.
    pub fn operation_timeout(&self) -> Duration {
        secs(self.operation_timeout_secs)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

fn positive(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("must be a finite number > 0, got {value}"),
        ))
    }
}

fn non_negative(field: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("must be a finite number >= 0, got {value}"),
        ))
    }
}

fn parse_env<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
        }),
    }
}
