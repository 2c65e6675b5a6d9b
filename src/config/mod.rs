//! Configuration system (layered: defaults < TOML file < env < code).

use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::broadcast::DEFAULT_LOG_WARN_THRESHOLD;
use crate::error::RociError;
use crate::util::retry::RetryPolicy;

/// Global default config (lazy-initialized from env).
static DEFAULT_CONFIG: OnceLock<StreamConfig> = OnceLock::new();

const ENV_PREFIX: &str = "ROCI_STREAM_";

/// Tunables for streaming runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub max_retries: u32,
    pub initial_retry_delay_ms: u64,
    pub backoff_factor: f64,
    pub max_retry_after_ms: u64,
    pub max_steps: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub log_warn_threshold: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_retry_delay_ms: 2000,
            backoff_factor: 2.0,
            max_retry_after_ms: 60_000,
            max_steps: None,
            timeout_ms: None,
            log_warn_threshold: DEFAULT_LOG_WARN_THRESHOLD,
        }
    }
}

impl StreamConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, RociError> {
        let config: Self = toml::from_str(text)?;
        config.validate()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RociError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Defaults overridden by `ROCI_STREAM_*` variables (`.env` is loaded first).
    pub fn from_env() -> Result<Self, RociError> {
        let _ = dotenvy::dotenv(); // load .env if present, ignore error
        Self::default().with_env()
    }

    /// Defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, RociError> {
        let _ = dotenvy::dotenv();
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        base.with_env()
    }

    /// Get (or create) the global default config. Invalid environment values
    /// fall back to defaults with a warning.
    pub fn global() -> &'static StreamConfig {
        DEFAULT_CONFIG.get_or_init(|| {
            Self::from_env().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "ignoring invalid stream configuration");
                Self::default()
            })
        })
    }

    /// Apply the process environment on top of `self`.
    pub fn with_env(self) -> Result<Self, RociError> {
        self.with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides from `lookup`, keyed by the variable name without prefix.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, RociError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse(&lookup, "MAX_RETRIES")? {
            self.max_retries = v;
        }
        if let Some(v) = parse(&lookup, "INITIAL_RETRY_DELAY_MS")? {
            self.initial_retry_delay_ms = v;
        }
        if let Some(v) = parse(&lookup, "BACKOFF_FACTOR")? {
            self.backoff_factor = v;
        }
        if let Some(v) = parse(&lookup, "MAX_RETRY_AFTER_MS")? {
            self.max_retry_after_ms = v;
        }
        if let Some(v) = parse(&lookup, "MAX_STEPS")? {
            self.max_steps = Some(v);
        }
        if let Some(v) = parse(&lookup, "TIMEOUT_MS")? {
            self.timeout_ms = Some(v);
        }
        if let Some(v) = parse(&lookup, "LOG_WARN_THRESHOLD")? {
            self.log_warn_threshold = v;
        }
        self.validate()
    }

    /// Reject values the retry loop cannot work with.
    pub fn validate(self) -> Result<Self, RociError> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(RociError::Configuration(format!(
                "backoff_factor must be a finite number >= 1.0, got {}",
                self.backoff_factor
            )));
        }
        Ok(self)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_backoff: Duration::from_millis(self.initial_retry_delay_ms),
            multiplier: self.backoff_factor,
            max_retry_after: Duration::from_millis(self.max_retry_after_ms),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, RociError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse().map(Some).map_err(|e| {
            RociError::Configuration(format!("{ENV_PREFIX}{key}={raw:?}: {e}"))
        }),
    }
}
