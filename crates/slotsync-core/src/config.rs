//! Engine configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.
//! Durations are integer milliseconds in `*_ms` keys and are read back as
//! [`std::time::Duration`] through accessor methods.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::conflict::queue::DEFAULT_RESOLVED_RETENTION;
use crate::error::{EngineError, EngineResult};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub connection: ConnectionConfig,
    pub sync: SyncConfig,
    pub bus: BusConfig,
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(raw: &str) -> EngineResult<Self> {
        let config: Self = serde_json::from_str(raw)
            .map_err(|e| EngineError::Config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&raw)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> EngineResult<()> {
        self.connection.validate()?;
        self.sync.validate()?;
        if self.bus.stream_capacity == 0 {
            return Err(EngineError::Config(
                "bus.stream_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn require_positive(name: &str, value: u64) -> EngineResult<()> {
    if value == 0 {
        return Err(EngineError::Config(format!("{name} must be positive")));
    }
    Ok(())
}

/// Heartbeat, quality and reconnection settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    pub heartbeat_interval_ms: u64,
    /// A probe slower than this counts as failed
    pub probe_timeout_ms: u64,
    pub max_reconnect_attempts: u32,
    pub base_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    /// Upper bound of the random jitter added to each reconnect delay
    pub max_jitter_ms: u64,
    pub excellent_latency_ms: u64,
    pub good_latency_ms: u64,
    /// Latency at or above this is classified offline
    pub poor_latency_ms: u64,
    /// Consecutive offline-grade probes before the link is declared down
    pub sustained_slow_probes: u32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            probe_timeout_ms: 30_000,
            max_reconnect_attempts: 10,
            base_reconnect_delay_ms: 1_000,
            max_reconnect_delay_ms: 30_000,
            max_jitter_ms: 1_000,
            excellent_latency_ms: 100,
            good_latency_ms: 300,
            poor_latency_ms: 1_000,
            sustained_slow_probes: 3,
        }
    }
}

impl ConnectionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn base_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.base_reconnect_delay_ms)
    }

    pub fn max_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.max_reconnect_delay_ms)
    }

    pub fn max_jitter(&self) -> Duration {
        Duration::from_millis(self.max_jitter_ms)
    }

    fn validate(&self) -> EngineResult<()> {
        require_positive("connection.heartbeat_interval_ms", self.heartbeat_interval_ms)?;
        require_positive("connection.probe_timeout_ms", self.probe_timeout_ms)?;
        require_positive("connection.base_reconnect_delay_ms", self.base_reconnect_delay_ms)?;
        require_positive(
            "connection.sustained_slow_probes",
            u64::from(self.sustained_slow_probes),
        )?;
        if self.max_reconnect_delay_ms < self.base_reconnect_delay_ms {
            return Err(EngineError::Config(
                "connection.max_reconnect_delay_ms is below base_reconnect_delay_ms".to_string(),
            ));
        }
        if !(self.excellent_latency_ms < self.good_latency_ms
            && self.good_latency_ms < self.poor_latency_ms)
        {
            return Err(EngineError::Config(
                "connection latency thresholds must be strictly increasing".to_string(),
            ));
        }
        Ok(())
    }
}

/// Orchestrator staleness and retry settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub stale_data_threshold_ms: u64,
    pub stale_sweep_interval_ms: u64,
    /// Subscription setup attempts per key before giving up
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub retry_max_delay_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_data_threshold_ms: 5 * 60 * 1_000,
            stale_sweep_interval_ms: 60_000,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            retry_max_delay_ms: 30_000,
        }
    }
}

impl SyncConfig {
    pub fn stale_data_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_data_threshold_ms)
    }

    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.stale_sweep_interval_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }

    fn validate(&self) -> EngineResult<()> {
        require_positive("sync.stale_data_threshold_ms", self.stale_data_threshold_ms)?;
        require_positive("sync.stale_sweep_interval_ms", self.stale_sweep_interval_ms)?;
        require_positive("sync.retry_base_delay_ms", self.retry_base_delay_ms)?;
        if self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(EngineError::Config(
                "sync.retry_max_delay_ms is below retry_base_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

/// Event bus settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BusConfig {
    /// Capacity of the async broadcast mirror of bus events
    pub stream_capacity: usize,
    /// Resolved conflict records kept before the oldest are dropped
    pub resolved_conflict_retention: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            stream_capacity: 256,
            resolved_conflict_retention: DEFAULT_RESOLVED_RETENTION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.connection.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(config.connection.max_reconnect_attempts, 10);
        assert_eq!(config.sync.stale_data_threshold(), Duration::from_secs(300));
        assert_eq!(config.sync.max_retries, 3);
        assert_eq!(config.bus.stream_capacity, 256);
        assert_eq!(config.bus.resolved_conflict_retention, 128);
    }

    #[test]
    fn test_partial_override() {
        let config = EngineConfig::from_json_str(
            r#"{ "connection": { "heartbeat_interval_ms": 5000 }, "sync": { "max_retries": 5 } }"#,
        )
        .unwrap();
        assert_eq!(config.connection.heartbeat_interval(), Duration::from_secs(5));
        assert_eq!(config.connection.probe_timeout(), Duration::from_secs(30));
        assert_eq!(config.sync.max_retries, 5);
    }

    #[test]
    fn test_rejects_unknown_keys() {
        let err = EngineConfig::from_json_str(r#"{ "connection": { "heartbeat": 5 } }"#).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_rejects_inverted_settings() {
        assert!(EngineConfig::from_json_str(
            r#"{ "connection": { "base_reconnect_delay_ms": 5000, "max_reconnect_delay_ms": 1000 } }"#
        )
        .is_err());
        assert!(EngineConfig::from_json_str(
            r#"{ "connection": { "excellent_latency_ms": 500, "good_latency_ms": 300 } }"#
        )
        .is_err());
        assert!(EngineConfig::from_json_str(r#"{ "sync": { "stale_sweep_interval_ms": 0 } }"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{ "bus": { "stream_capacity": 0 } }"#).is_err());
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "bus": {{ "stream_capacity": 16 }} }}"#).unwrap();
        let config = EngineConfig::from_path(file.path()).unwrap();
        assert_eq!(config.bus.stream_capacity, 16);
    }
}
