//! Batch-group failure tracking with exponential backoff and a circuit breaker.
//!
//! Each resource type's batch group counts its own consecutive fetch failures.
//! Every failure computes the next retry delay (`base * 2^(attempt-1)`, capped);
//! the retry itself happens on the next regular poll tick. Once the counter
//! exceeds the configured maximum the group "trips": its subscribers are
//! dropped and the type stays disabled until a fresh subscription re-adds
//! interest.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;

use super::types::ResourceType;
use crate::config::RealtimeConfig;

// =============================================================================
// Status
// =============================================================================

/// Scheduler-wide connection status derived from every batch group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Reconnecting,
    Disabled,
}

/// Diagnostics for one batch group.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GroupHealth {
    pub consecutive_failures: u32,
    pub last_retry_delay_ms: Option<u64>,
    pub last_error: Option<String>,
    pub disabled: bool,
}

/// What the scheduler should do after recording a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Keep the group; the next tick retries.
    Retry { attempt: u32, delay: Duration },
    /// Threshold exceeded: unsubscribe the whole group.
    Trip { attempt: u32 },
}

/// `base * 2^(attempt-1)`, saturating at `max`. Attempt 0 means no delay.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let factor = 1u32.checked_shl(attempt - 1).unwrap_or(u32::MAX);
    base.checked_mul(factor).unwrap_or(max).min(max)
}

// =============================================================================
// Circuit breaker
// =============================================================================

pub struct CircuitBreaker {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    groups: HashMap<ResourceType, GroupHealth>,
}

impl CircuitBreaker {
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            base_delay: config.base_retry_delay,
            max_delay: config.max_retry_delay,
            max_attempts: config.max_reconnect_attempts,
            groups: HashMap::new(),
        }
    }

    /// A successful fetch closes the group's circuit.
    pub fn record_success(&mut self, resource_type: ResourceType) {
        self.groups.remove(&resource_type);
    }

    pub fn record_failure(&mut self, resource_type: ResourceType, error: &str) -> FailureOutcome {
        let health = self.groups.entry(resource_type).or_default();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.last_error = Some(error.to_string());
        let attempt = health.consecutive_failures;

        if attempt > self.max_attempts {
            health.disabled = true;
            return FailureOutcome::Trip { attempt };
        }

        let delay = backoff_delay(self.base_delay, self.max_delay, attempt);
        health.last_retry_delay_ms = Some(delay.as_millis() as u64);
        FailureOutcome::Retry { attempt, delay }
    }

    /// Fresh interest in a resource type restarts its batch group from scratch.
    pub fn reset(&mut self, resource_type: ResourceType) {
        self.groups.remove(&resource_type);
    }

    /// Drop failure state for a group that lost all subscribers, keeping
    /// disabled marks so the status keeps reporting the outage.
    pub fn forget(&mut self, resource_type: ResourceType) {
        if self.groups.get(&resource_type).is_some_and(|h| !h.disabled) {
            self.groups.remove(&resource_type);
        }
    }

    pub fn forget_all(&mut self) {
        self.groups.retain(|_, h| h.disabled);
    }

    pub fn is_disabled(&self, resource_type: ResourceType) -> bool {
        self.groups.get(&resource_type).is_some_and(|h| h.disabled)
    }

    pub fn health(&self, resource_type: ResourceType) -> Option<GroupHealth> {
        self.groups.get(&resource_type).cloned()
    }

    /// Largest consecutive-failure count among groups still being retried.
    pub fn reconnect_attempts(&self) -> u32 {
        self.groups
            .values()
            .filter(|h| !h.disabled)
            .map(|h| h.consecutive_failures)
            .max()
            .unwrap_or(0)
    }

    pub fn status(&self) -> ConnectionStatus {
        if self.groups.values().any(|h| !h.disabled && h.consecutive_failures > 0) {
            ConnectionStatus::Reconnecting
        } else if self.groups.values().any(|h| h.disabled) {
            ConnectionStatus::Disabled
        } else {
            ConnectionStatus::Connected
        }
    }
}
