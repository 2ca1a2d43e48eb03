//! Runtime configuration for the realtime poller.
//!
//! Values come from [`RealtimeConfig::default`] and can be overridden from the
//! process environment (a `.env` file is honoured via `dotenvy`).

use std::time::Duration;

use serde::Serialize;

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Shared poll timer period.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
/// Reserved for latency-sensitive resource types; not wired to the scheduler.
pub const DEFAULT_PRIORITY_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Validity window of a batch cache entry.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);
/// First retry delay after a batch fetch failure (doubles per attempt).
pub const DEFAULT_BASE_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Upper bound for the computed retry delay.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(30);
/// Consecutive failures tolerated before a batch group is disabled.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

const ENV_POLL_SECS: &str = "LEADBOARD_POLL_SECS";
const ENV_CACHE_TTL_SECS: &str = "LEADBOARD_CACHE_TTL_SECS";
const ENV_RETRY_BASE_MS: &str = "LEADBOARD_RETRY_BASE_MS";
const ENV_RETRY_MAX_MS: &str = "LEADBOARD_RETRY_MAX_MS";
const ENV_MAX_RECONNECT_ATTEMPTS: &str = "LEADBOARD_MAX_RECONNECT_ATTEMPTS";

// ---------------------------------------------------------------------------
// RealtimeConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RealtimeConfig {
    pub poll_interval: Duration,
    pub priority_poll_interval: Duration,
    pub cache_ttl: Duration,
    pub base_retry_delay: Duration,
    pub max_retry_delay: Duration,
    pub max_reconnect_attempts: u32,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            priority_poll_interval: DEFAULT_PRIORITY_POLL_INTERVAL,
            cache_ttl: DEFAULT_CACHE_TTL,
            base_retry_delay: DEFAULT_BASE_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

impl RealtimeConfig {
    /// Load defaults, then apply `LEADBOARD_*` overrides from the environment.
    pub fn from_env() -> Result<Self, AppError> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                tracing::warn!("Ignoring unreadable .env file: {}", e);
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup (environment, settings map, ...).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(secs) = parse_u64(&lookup, ENV_POLL_SECS)? {
            cfg.poll_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_u64(&lookup, ENV_CACHE_TTL_SECS)? {
            cfg.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_u64(&lookup, ENV_RETRY_BASE_MS)? {
            cfg.base_retry_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, ENV_RETRY_MAX_MS)? {
            cfg.max_retry_delay = Duration::from_millis(ms);
        }
        if let Some(n) = parse_u64(&lookup, ENV_MAX_RECONNECT_ATTEMPTS)? {
            cfg.max_reconnect_attempts = u32::try_from(n).map_err(|_| {
                AppError::Config(format!("{ENV_MAX_RECONNECT_ATTEMPTS} out of range: {n}"))
            })?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.poll_interval.is_zero() {
            return Err(AppError::Config("poll interval must be greater than zero".into()));
        }
        if self.cache_ttl.is_zero() {
            return Err(AppError::Config("cache ttl must be greater than zero".into()));
        }
        if self.base_retry_delay > self.max_retry_delay {
            return Err(AppError::Config(format!(
                "base retry delay ({:?}) exceeds max retry delay ({:?})",
                self.base_retry_delay, self.max_retry_delay
            )));
        }
        Ok(())
    }
}

fn parse_u64<F>(lookup: &F, key: &str) -> Result<Option<u64>, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| AppError::Config(format!("{key}={raw:?}: {e}"))),
    }
}
