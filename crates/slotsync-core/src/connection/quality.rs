//! Connection quality classification from probe latency

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::ConnectionConfig;

/// Coarse link quality derived from the last heartbeat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionQuality {
    Excellent,
    Good,
    Poor,
    Offline,
}

impl ConnectionQuality {
    /// Classify a successful probe's round-trip time
    pub fn classify(latency: Duration, config: &ConnectionConfig) -> Self {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        if ms < config.excellent_latency_ms {
            ConnectionQuality::Excellent
        } else if ms < config.good_latency_ms {
            ConnectionQuality::Good
        } else if ms < config.poor_latency_ms {
            ConnectionQuality::Poor
        } else {
            ConnectionQuality::Offline
        }
    }
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionQuality::Excellent => write!(f, "excellent"),
            ConnectionQuality::Good => write!(f, "good"),
            ConnectionQuality::Poor => write!(f, "poor"),
            ConnectionQuality::Offline => write!(f, "offline"),
        }
    }
}
