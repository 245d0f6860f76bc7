//! Exponential reconnection backoff
//!
//! `delay = min(max_delay, base * 2^min(attempt, 5) + jitter)` where jitter
//! is drawn uniformly from `[0, max_jitter]`.

use std::time::Duration;

use rand::Rng;

use crate::config::{ConnectionConfig, SyncConfig};

/// Exponent cap; attempts beyond this reuse the `base * 32` step
const MAX_EXPONENT: u32 = 5;

/// Delay schedule shared by reconnection and subscription-setup retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
    pub max_jitter: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration, max_jitter: Duration) -> Self {
        Self {
            base,
            max,
            max_jitter,
        }
    }

    /// Policy for connection reconnects
    pub fn for_connection(config: &ConnectionConfig) -> Self {
        Self::new(
            config.base_reconnect_delay(),
            config.max_reconnect_delay(),
            config.max_jitter(),
        )
    }

    /// Policy for subscription setup retries; jitter is bounded by the base delay
    pub fn for_subscriptions(config: &SyncConfig) -> Self {
        Self::new(
            config.retry_base_delay(),
            config.retry_max_delay(),
            config.retry_base_delay(),
        )
    }

    /// Delay for `attempt` before jitter, capped at `max`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_EXPONENT);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Delay for `attempt` with an explicit jitter, clamped to `max_jitter`
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 1u32 << attempt.min(MAX_EXPONENT);
        self.base
            .saturating_mul(factor)
            .saturating_add(jitter.min(self.max_jitter))
            .min(self.max)
    }

    /// Delay for `attempt` with random jitter
    pub fn delay(&self, attempt: u32) -> Duration {
        let max_jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        let jitter = if max_jitter_ms == 0 {
            Duration::ZERO
        } else {
            Duration::from_millis(rand::rng().random_range(0..=max_jitter_ms))
        };
        self.delay_with_jitter(attempt, jitter)
    }

    /// Jitter-free delays for attempts `0..attempts`
    pub fn schedule(&self, attempts: u32) -> Vec<Duration> {
        (0..attempts).map(|a| self.base_delay(a)).collect()
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::for_connection(&ConnectionConfig::default())
    }
}
